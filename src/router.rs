use crate::cache::{LruCache, ParamsPool};
use crate::perf::PerfHooks;
use crate::request::{Method, Params, UrlParts};
use crate::websocket::WsHandlerRef;
use crate::{ErrorHandler, ErrorHandlerRef, Handler, HandlerChain, HandlerRef};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

pub(crate) type MethodMap = HashMap<Method, HandlerChain>;

/// Successful route lookup: the handler chain plus frozen parameter bindings
#[derive(Clone)]
pub struct RouteMatch {
    pub chain: HandlerChain,
    pub params: Params,
}

/// One segment in the routing tree
///
/// Candidate kinds per segment, in matching precedence order: static,
/// pattern, parametric, single-segment wildcard, with a catch-all child
/// remembered as a fallback for the remaining path.
struct TrieNode<V> {
    value: Option<V>,
    static_children: HashMap<String, TrieNode<V>>,
    pattern_children: Vec<PatternChild<V>>,
    param_child: Option<Box<ParamChild<V>>>,
    wildcard_child: Option<Box<WildcardChild<V>>>,
    catchall_child: Option<Box<CatchAllChild<V>>>,
}

struct PatternChild<V> {
    template: String,
    node: TrieNode<V>,
}

struct ParamChild<V> {
    name: String,
    node: TrieNode<V>,
}

struct WildcardChild<V> {
    name: Option<String>,
    node: TrieNode<V>,
}

struct CatchAllChild<V> {
    name: Option<String>,
    node: TrieNode<V>,
}

enum SegKind<'a> {
    Static(&'a str),
    Pattern(&'a str),
    Param(&'a str),
    Wildcard(Option<&'a str>),
    CatchAll(Option<&'a str>),
}

fn is_capture_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn classify(seg: &str, terminal: bool) -> SegKind<'_> {
    if seg == "**" {
        return SegKind::CatchAll(None);
    }
    if let Some(name) = seg.strip_prefix("**") {
        if is_capture_name(name) {
            return SegKind::CatchAll(Some(name));
        }
        return SegKind::Pattern(seg);
    }
    if seg == "*" {
        // a terminal bare `*` swallows the rest of the path
        return if terminal {
            SegKind::CatchAll(Some("*"))
        } else {
            SegKind::Wildcard(None)
        };
    }
    if let Some(name) = seg.strip_prefix('*') {
        if is_capture_name(name) {
            return SegKind::Wildcard(Some(name));
        }
        return SegKind::Pattern(seg);
    }
    if let Some(name) = seg.strip_prefix(':') {
        return SegKind::Param(name);
    }
    if seg.contains('*') {
        return SegKind::Pattern(seg);
    }
    SegKind::Static(seg)
}

/// Split a path on `/`, dropping only the leading empty segment so that
/// `/x` and `/x/` stay distinct (`["x"]` vs `["x", ""]`).
fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    trimmed.split('/').collect()
}

/// Decode `%XX` escapes in one path segment. Malformed escapes and decoded
/// bytes that do not form UTF-8 leave the segment unchanged.
fn percent_decode(seg: &str) -> String {
    if !seg.contains('%') {
        return seg.to_string();
    }
    let bytes = seg.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(byte) = bytes
                .get(i + 1..i + 3)
                .and_then(|hex| std::str::from_utf8(hex).ok())
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| seg.to_string())
}

/// Match a single segment against a template where `*` stands for any run
/// of characters. Two-pointer scan with backtracking; no regex.
fn pattern_match(template: &str, text: &str) -> bool {
    let p = template.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;
    while ti < t.len() {
        if pi < p.len() && p[pi] != b'*' && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

impl<V> TrieNode<V> {
    fn empty() -> Self {
        TrieNode {
            value: None,
            static_children: HashMap::new(),
            pattern_children: Vec::new(),
            param_child: None,
            wildcard_child: None,
            catchall_child: None,
        }
    }

    /// Descend (creating nodes) along the classified segments and return
    /// the slot the terminal value lives in.
    fn insert_at(&mut self, segments: &[&str]) -> &mut Option<V> {
        if segments.is_empty() {
            return &mut self.value;
        }
        let seg = segments[0];
        let rest = &segments[1..];
        match classify(seg, rest.is_empty()) {
            SegKind::Static(s) => self
                .static_children
                .entry(s.to_string())
                .or_insert_with(TrieNode::empty)
                .insert_at(rest),
            SegKind::Pattern(template) => {
                if let Some(pos) = self
                    .pattern_children
                    .iter()
                    .position(|pc| pc.template == template)
                {
                    self.pattern_children[pos].node.insert_at(rest)
                } else {
                    self.pattern_children.push(PatternChild {
                        template: template.to_string(),
                        node: TrieNode::empty(),
                    });
                    self.pattern_children
                        .last_mut()
                        .expect("just pushed")
                        .node
                        .insert_at(rest)
                }
            }
            SegKind::Param(name) => {
                let child = self.param_child.get_or_insert_with(|| {
                    Box::new(ParamChild {
                        name: name.to_string(),
                        node: TrieNode::empty(),
                    })
                });
                child.node.insert_at(rest)
            }
            SegKind::Wildcard(name) => {
                let child = self.wildcard_child.get_or_insert_with(|| {
                    Box::new(WildcardChild {
                        name: name.map(|n| n.to_string()),
                        node: TrieNode::empty(),
                    })
                });
                child.node.insert_at(rest)
            }
            SegKind::CatchAll(name) => {
                // a catch-all consumes the remainder; trailing template
                // segments after `**` have nothing left to match
                let child = self.catchall_child.get_or_insert_with(|| {
                    Box::new(CatchAllChild {
                        name: name.map(|n| n.to_string()),
                        node: TrieNode::empty(),
                    })
                });
                &mut child.node.value
            }
        }
    }

    fn walk<'t>(
        &'t self,
        segs: &[String],
        idx: usize,
        params: HashMap<String, String>,
        accept: &dyn Fn(&V) -> bool,
        fallback: &mut Option<(&'t V, HashMap<String, String>)>,
    ) -> Option<(&'t V, HashMap<String, String>)> {
        // remember the deepest acceptable catch-all, bound to the path
        // suffix that remains at this position
        if let Some(ca) = &self.catchall_child {
            if let Some(v) = ca.node.value.as_ref() {
                if accept(v) {
                    let mut bound = params.clone();
                    let name = ca.name.as_deref().unwrap_or("**");
                    bound.insert(name.to_string(), segs[idx..].join("/"));
                    *fallback = Some((v, bound));
                }
            }
        }

        if idx == segs.len() {
            return match &self.value {
                Some(v) if accept(v) => Some((v, params)),
                _ => None,
            };
        }

        let seg = &segs[idx];

        if let Some(child) = self.static_children.get(seg.as_str()) {
            if let Some(hit) = child.walk(segs, idx + 1, params.clone(), accept, fallback) {
                return Some(hit);
            }
        }

        for pc in &self.pattern_children {
            if pattern_match(&pc.template, seg) {
                let mut bound = params.clone();
                bound.insert("*".to_string(), seg.clone());
                if let Some(hit) = pc.node.walk(segs, idx + 1, bound, accept, fallback) {
                    return Some(hit);
                }
            }
        }

        if let Some(pc) = &self.param_child {
            let mut bound = params.clone();
            bound.insert(pc.name.clone(), seg.clone());
            if let Some(hit) = pc.node.walk(segs, idx + 1, bound, accept, fallback) {
                return Some(hit);
            }
        }

        if let Some(wc) = &self.wildcard_child {
            let mut bound = params.clone();
            match &wc.name {
                Some(name) => {
                    bound.insert(name.clone(), seg.clone());
                }
                None => {
                    bound.insert("*".to_string(), seg.clone());
                    bound.insert(idx.to_string(), seg.clone());
                }
            }
            if let Some(hit) = wc.node.walk(segs, idx + 1, bound, accept, fallback) {
                return Some(hit);
            }
        }

        None
    }

    /// Overlay `src` onto `self`; conflicting terminals resolve through
    /// `merge_value`, children merge recursively.
    fn merge_from(&mut self, src: TrieNode<V>, merge_value: &impl Fn(&mut Option<V>, V)) {
        if let Some(v) = src.value {
            merge_value(&mut self.value, v);
        }
        for (key, child) in src.static_children {
            match self.static_children.entry(key) {
                Entry::Occupied(slot) => slot.into_mut().merge_from(child, merge_value),
                Entry::Vacant(slot) => {
                    slot.insert(child);
                }
            }
        }
        for pc in src.pattern_children {
            if let Some(existing) = self
                .pattern_children
                .iter_mut()
                .find(|e| e.template == pc.template)
            {
                existing.node.merge_from(pc.node, merge_value);
            } else {
                self.pattern_children.push(pc);
            }
        }
        if let Some(src_param) = src.param_child {
            match &mut self.param_child {
                Some(existing) => existing.node.merge_from(src_param.node, merge_value),
                None => self.param_child = Some(src_param),
            }
        }
        if let Some(src_wc) = src.wildcard_child {
            match &mut self.wildcard_child {
                Some(existing) => existing.node.merge_from(src_wc.node, merge_value),
                None => self.wildcard_child = Some(src_wc),
            }
        }
        if let Some(src_ca) = src.catchall_child {
            match &mut self.catchall_child {
                Some(existing) => existing.node.merge_from(src_ca.node, merge_value),
                None => self.catchall_child = Some(src_ca),
            }
        }
    }

    /// Descend along literal segments, creating static nodes as needed
    fn ensure_static_path(&mut self, segments: &[&str]) -> &mut TrieNode<V> {
        let mut node = self;
        for seg in segments {
            node = node
                .static_children
                .entry(seg.to_string())
                .or_insert_with(TrieNode::empty);
        }
        node
    }
}

struct Caches {
    route: Mutex<LruCache<String, RouteMatch>>,
    url: Mutex<LruCache<String, UrlParts>>,
    exact: RwLock<HashMap<String, HandlerChain>>,
}

/// The routing core: insertion-ordered radix trie, middleware registry,
/// and the opt-in lookup caches.
pub struct Router {
    root: TrieNode<MethodMap>,
    ws_root: TrieNode<WsHandlerRef>,
    /// `(prefix, middleware)` in registration order; an empty prefix is
    /// global. Kept flat so interleaved global/prefixed registrations run
    /// in exactly the order the application declared them.
    middlewares: Vec<(String, HandlerRef)>,
    error_handlers: Vec<ErrorHandlerRef>,
    caches: Option<Caches>,
    pub(crate) pool: ParamsPool,
    pub(crate) perf: Option<Arc<PerfHooks>>,
    pub(crate) debug: bool,
}

impl Router {
    pub fn new() -> Self {
        Router {
            root: TrieNode::empty(),
            ws_root: TrieNode::empty(),
            middlewares: Vec::new(),
            error_handlers: Vec::new(),
            caches: None,
            pool: ParamsPool::default(),
            perf: None,
            debug: false,
        }
    }

    /// Allocate the LRU route cache, the URL-parse cache, and the
    /// exact-route map. Any later trie mutation invalidates them.
    pub fn enable_cache(&mut self, route_capacity: usize, url_capacity: usize) {
        self.caches = Some(Caches {
            route: Mutex::new(LruCache::new(route_capacity)),
            url: Mutex::new(LruCache::new(url_capacity)),
            exact: RwLock::new(HashMap::new()),
        });
        self.rebuild_exact();
    }

    pub fn enable_perf_hooks(&mut self) {
        self.perf = Some(Arc::new(PerfHooks::new()));
    }

    pub fn perf_snapshot(&self) -> Option<crate::perf::PerfSnapshot> {
        self.perf.as_ref().map(|p| p.snapshot())
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Register a handler chain for one method and path
    pub fn route(&mut self, method: Method, path: &str, chain: Vec<HandlerRef>) {
        let chain: HandlerChain = Arc::from(chain);
        let segments = split_path(path);
        let slot = self.root.insert_at(&segments);
        slot.get_or_insert_with(HashMap::new).insert(method, chain);
        self.invalidate();
    }

    pub fn get(&mut self, path: &str, handler: impl Handler + 'static) {
        self.route(Method::GET, path, vec![Arc::new(handler)]);
    }

    pub fn post(&mut self, path: &str, handler: impl Handler + 'static) {
        self.route(Method::POST, path, vec![Arc::new(handler)]);
    }

    pub fn put(&mut self, path: &str, handler: impl Handler + 'static) {
        self.route(Method::PUT, path, vec![Arc::new(handler)]);
    }

    pub fn patch(&mut self, path: &str, handler: impl Handler + 'static) {
        self.route(Method::PATCH, path, vec![Arc::new(handler)]);
    }

    pub fn delete(&mut self, path: &str, handler: impl Handler + 'static) {
        self.route(Method::DELETE, path, vec![Arc::new(handler)]);
    }

    pub fn head(&mut self, path: &str, handler: impl Handler + 'static) {
        self.route(Method::HEAD, path, vec![Arc::new(handler)]);
    }

    pub fn options(&mut self, path: &str, handler: impl Handler + 'static) {
        self.route(Method::OPTIONS, path, vec![Arc::new(handler)]);
    }

    /// Register the same chain for every known method
    pub fn all(&mut self, path: &str, handler: impl Handler + 'static) {
        let chain: HandlerChain = Arc::from(vec![Arc::new(handler) as HandlerRef]);
        let segments = split_path(path);
        let slot = self.root.insert_at(&segments);
        let map = slot.get_or_insert_with(HashMap::new);
        for method in Method::KNOWN {
            map.insert(method, chain.clone());
        }
        self.invalidate();
    }

    /// Register global middleware
    pub fn middleware(&mut self, handler: impl Handler + 'static) {
        self.middlewares.push((String::new(), Arc::new(handler)));
    }

    /// Register middleware for every request whose path starts with `prefix`
    pub fn middleware_at(&mut self, prefix: &str, handler: impl Handler + 'static) {
        self.middlewares.push((prefix.to_string(), Arc::new(handler)));
    }

    /// Register error middleware, run only when a stage fails
    pub fn error_middleware(&mut self, handler: impl ErrorHandler + 'static) {
        self.error_handlers.push(Arc::new(handler));
    }

    /// Register a WebSocket route
    pub fn ws(&mut self, path: &str, handler: impl crate::websocket::WsHandler + 'static) {
        let segments = split_path(path);
        let slot = self.ws_root.insert_at(&segments);
        *slot = Some(Arc::new(handler));
        self.invalidate();
    }

    /// Overlay another router's routes onto this one. Conflicting
    /// `(method, path)` registrations are won by the merged side; its
    /// middleware and error middleware are appended after the existing
    /// registrations.
    pub fn merge(&mut self, other: Router) {
        let Router {
            root,
            ws_root,
            middlewares,
            error_handlers,
            ..
        } = other;
        self.root.merge_from(root, &|dst, src| {
            let map = dst.get_or_insert_with(HashMap::new);
            for (method, chain) in src {
                map.insert(method, chain);
            }
        });
        self.ws_root.merge_from(ws_root, &|dst, src| *dst = Some(src));
        self.middlewares.extend(middlewares);
        self.error_handlers.extend(error_handlers);
        self.invalidate();
    }

    /// Mount another router under a static prefix. Its global middleware
    /// becomes path-prefix middleware for the mount point.
    pub fn nest(&mut self, prefix: &str, other: Router) {
        let clean = prefix.trim_end_matches('/');
        if clean.is_empty() {
            self.merge(other);
            return;
        }
        let Router {
            root,
            ws_root,
            middlewares,
            error_handlers,
            ..
        } = other;

        let segments = split_path(clean);
        self.root
            .ensure_static_path(&segments)
            .merge_from(root, &|dst, src| {
                let map = dst.get_or_insert_with(HashMap::new);
                for (method, chain) in src {
                    map.insert(method, chain);
                }
            });
        self.ws_root
            .ensure_static_path(&segments)
            .merge_from(ws_root, &|dst, src| *dst = Some(src));

        for (mw_prefix, handler) in middlewares {
            let combined = if mw_prefix.is_empty() {
                clean.to_string()
            } else {
                format!("{}{}", clean, mw_prefix)
            };
            self.middlewares.push((combined, handler));
        }
        self.error_handlers.extend(error_handlers);
        self.invalidate();
    }

    /// Handler chain lookup. Consults the exact-route map, then the LRU
    /// route cache, then walks the trie (populating only the LRU cache).
    /// Never errors; `None` is the no-match sentinel.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let key = format!("{}:{}", method, path);

        if let Some(caches) = &self.caches {
            if let Ok(exact) = caches.exact.read() {
                if let Some(chain) = exact.get(&key) {
                    self.note_cache_hit();
                    return Some(RouteMatch {
                        chain: chain.clone(),
                        params: Params::default(),
                    });
                }
                if *method == Method::HEAD {
                    if let Some(chain) = exact.get(&format!("GET:{}", path)) {
                        self.note_cache_hit();
                        return Some(RouteMatch {
                            chain: chain.clone(),
                            params: Params::default(),
                        });
                    }
                }
            }
            if let Ok(mut route_cache) = caches.route.lock() {
                if let Some(hit) = route_cache.get(&key) {
                    self.note_cache_hit();
                    return Some(hit.clone());
                }
            }
            self.note_cache_miss();
        }

        let matched = self.walk_http(method, path)?;
        if let Some(caches) = &self.caches {
            if let Ok(mut route_cache) = caches.route.lock() {
                route_cache.insert(key, matched.clone());
            }
        }
        Some(matched)
    }

    fn walk_http(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let segs: Vec<String> = split_path(path).iter().map(|s| percent_decode(s)).collect();
        let head = *method == Method::HEAD;
        let accept = |map: &MethodMap| {
            map.contains_key(method) || (head && map.contains_key(&Method::GET))
        };

        let seed = self.pool.take();
        let mut fallback = None;
        let (map, params) = self
            .root
            .walk(&segs, 0, seed, &accept, &mut fallback)
            .or(fallback)?;

        let chain = map
            .get(method)
            .or_else(|| if head { map.get(&Method::GET) } else { None })?
            .clone();
        Some(RouteMatch {
            chain,
            params: Params::publish(params),
        })
    }

    /// WebSocket route lookup, same trie semantics as HTTP lookup
    pub fn lookup_ws(&self, path: &str) -> Option<(WsHandlerRef, Params)> {
        let segs: Vec<String> = split_path(path).iter().map(|s| percent_decode(s)).collect();
        let accept = |_: &WsHandlerRef| true;
        let mut fallback = None;
        let (handler, params) = self
            .ws_root
            .walk(&segs, 0, self.pool.take(), &accept, &mut fallback)
            .or(fallback)?;
        Some((handler.clone(), Params::publish(params)))
    }

    /// Middleware applying to `path`, in registration order
    pub(crate) fn middlewares_for(&self, path: &str) -> Vec<HandlerRef> {
        self.middlewares
            .iter()
            .filter(|(prefix, _)| prefix.is_empty() || path.starts_with(prefix.as_str()))
            .map(|(_, handler)| handler.clone())
            .collect()
    }

    pub(crate) fn error_chain(&self) -> &[ErrorHandlerRef] {
        &self.error_handlers
    }

    /// Split a raw URL into path and query, through the URL-parse cache
    /// when one is allocated
    pub(crate) fn url_parts_for(&self, raw: &str) -> UrlParts {
        let caches = match &self.caches {
            Some(c) => c,
            None => return UrlParts::split(raw),
        };
        if let Ok(mut url_cache) = caches.url.lock() {
            let key = raw.to_string();
            if let Some(parts) = url_cache.get(&key) {
                return parts.clone();
            }
            let parts = UrlParts::split(raw);
            url_cache.insert(key, parts.clone());
            return parts;
        }
        UrlParts::split(raw)
    }

    /// Drop every cached lookup result, including the URL-parse cache, and
    /// rebuild the exact-route map.
    pub fn clear_caches(&self) {
        if let Some(caches) = &self.caches {
            if let Ok(mut route_cache) = caches.route.lock() {
                route_cache.clear();
            }
            if let Ok(mut url_cache) = caches.url.lock() {
                url_cache.clear();
            }
        }
        self.rebuild_exact();
    }

    /// Drop every cached lookup result and rebuild the exact-route map.
    /// Runs after every trie mutation so no stale entry survives.
    fn invalidate(&mut self) {
        if let Some(caches) = &self.caches {
            if let Ok(mut route_cache) = caches.route.lock() {
                route_cache.clear();
            }
        }
        self.rebuild_exact();
    }

    fn rebuild_exact(&self) {
        let caches = match &self.caches {
            Some(c) => c,
            None => return,
        };
        let mut map = HashMap::new();
        let mut segs = Vec::new();
        collect_static(&self.root, &mut segs, &mut map);
        if let Ok(mut exact) = caches.exact.write() {
            *exact = map;
        }
    }

    fn note_cache_hit(&self) {
        if let Some(perf) = &self.perf {
            perf.record_cache_hit();
        }
    }

    fn note_cache_miss(&self) {
        if let Some(perf) = &self.perf {
            perf.record_cache_miss();
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Gather every purely-static terminal into `METHOD:/full/path` keys
fn collect_static(
    node: &TrieNode<MethodMap>,
    segs: &mut Vec<String>,
    out: &mut HashMap<String, HandlerChain>,
) {
    if let Some(methods) = &node.value {
        let path = if segs.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", segs.join("/"))
        };
        for (method, chain) in methods {
            out.insert(format!("{}:{}", method, path), chain.clone());
        }
    }
    for (seg, child) in &node.static_children {
        segs.push(seg.clone());
        collect_static(child, segs, out);
        segs.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{handler, Flow};

    fn noop() -> HandlerRef {
        handler(|req: crate::Request, res: crate::Response| async move { Flow::Next(req, res) })
    }

    fn router_with(routes: &[(Method, &str)]) -> Router {
        let mut router = Router::new();
        for (method, path) in routes {
            router.route(method.clone(), path, vec![noop()]);
        }
        router
    }

    #[test]
    fn static_route_round_trip() {
        let router = router_with(&[(Method::GET, "/users/all")]);
        let hit = router.lookup(&Method::GET, "/users/all").unwrap();
        assert!(hit.params.is_empty());
        assert!(router.lookup(&Method::POST, "/users/all").is_none());
        assert!(router.lookup(&Method::GET, "/users").is_none());
    }

    #[test]
    fn parameter_capture() {
        let router = router_with(&[(Method::GET, "/users/:id")]);
        let hit = router.lookup(&Method::GET, "/users/42").unwrap();
        assert_eq!(hit.params.get("id"), Some("42"));
    }

    #[test]
    fn static_beats_pattern_beats_param_beats_wildcard() {
        let mut router = Router::new();
        let statics = noop();
        let pattern = noop();
        let param = noop();
        let wild = noop();
        router.route(Method::GET, "/f/exact.js", vec![statics.clone()]);
        router.route(Method::GET, "/f/*.js", vec![pattern.clone()]);
        router.route(Method::GET, "/f/:name", vec![param.clone()]);
        router.route(Method::GET, "/f/*any/x", vec![wild.clone()]);

        let hit = router.lookup(&Method::GET, "/f/exact.js").unwrap();
        assert!(Arc::ptr_eq(&hit.chain[0], &statics));

        let hit = router.lookup(&Method::GET, "/f/other.js").unwrap();
        assert!(Arc::ptr_eq(&hit.chain[0], &pattern));
        assert_eq!(hit.params.get("*"), Some("other.js"));

        let hit = router.lookup(&Method::GET, "/f/plain").unwrap();
        assert!(Arc::ptr_eq(&hit.chain[0], &param));
        assert_eq!(hit.params.get("name"), Some("plain"));

        let hit = router.lookup(&Method::GET, "/f/anything/x").unwrap();
        assert!(Arc::ptr_eq(&hit.chain[0], &wild));
        assert_eq!(hit.params.get("any"), Some("anything"));
    }

    #[test]
    fn catchall_collects_remaining_segments() {
        let mut router = Router::new();
        let v1 = noop();
        let all = noop();
        router.route(Method::GET, "/api/v1", vec![v1]);
        router.route(Method::GET, "/api/**", vec![all.clone()]);

        let hit = router.lookup(&Method::GET, "/api/v1/stats/today").unwrap();
        assert!(Arc::ptr_eq(&hit.chain[0], &all));
        assert_eq!(hit.params.get("**"), Some("v1/stats/today"));
    }

    #[test]
    fn named_catchall_and_terminal_star() {
        let mut router = Router::new();
        router.route(Method::GET, "/docs/**rest", vec![noop()]);
        router.route(Method::GET, "/raw/*", vec![noop()]);

        let hit = router.lookup(&Method::GET, "/docs/a/b/c").unwrap();
        assert_eq!(hit.params.get("rest"), Some("a/b/c"));

        let hit = router.lookup(&Method::GET, "/raw/x/y").unwrap();
        assert_eq!(hit.params.get("*"), Some("x/y"));
    }

    #[test]
    fn pattern_requires_suffix() {
        let router = router_with(&[(Method::GET, "/files/*.pdf")]);
        let hit = router.lookup(&Method::GET, "/files/report.pdf").unwrap();
        assert_eq!(hit.params.get("*"), Some("report.pdf"));
        assert!(router.lookup(&Method::GET, "/files/report.doc").is_none());
    }

    #[test]
    fn unnamed_wildcard_binds_star_and_position() {
        let router = router_with(&[(Method::GET, "/a/*/c")]);
        let hit = router.lookup(&Method::GET, "/a/b/c").unwrap();
        assert_eq!(hit.params.get("*"), Some("b"));
        assert_eq!(hit.params.get("1"), Some("b"));
    }

    #[test]
    fn head_falls_through_to_get() {
        let router = router_with(&[(Method::GET, "/resource")]);
        assert!(router.lookup(&Method::HEAD, "/resource").is_some());

        let mut router = Router::new();
        let head = noop();
        let get = noop();
        router.route(Method::HEAD, "/r", vec![head.clone()]);
        router.route(Method::GET, "/r", vec![get]);
        let hit = router.lookup(&Method::HEAD, "/r").unwrap();
        assert!(Arc::ptr_eq(&hit.chain[0], &head));
    }

    #[test]
    fn trailing_slash_routes_are_distinct() {
        let router = router_with(&[(Method::GET, "/x")]);
        assert!(router.lookup(&Method::GET, "/x").is_some());
        assert!(router.lookup(&Method::GET, "/x/").is_none());

        let router = router_with(&[(Method::GET, "/x/"), (Method::GET, "/x")]);
        assert!(router.lookup(&Method::GET, "/x/").is_some());
    }

    #[test]
    fn segments_are_percent_decoded() {
        let router = router_with(&[(Method::GET, "/tags/rust lang")]);
        let hit = router.lookup(&Method::GET, "/tags/rust%20lang").unwrap();
        assert!(hit.params.is_empty());

        let router = router_with(&[(Method::GET, "/tags/:tag")]);
        let hit = router.lookup(&Method::GET, "/tags/a%2Fb").unwrap();
        assert_eq!(hit.params.get("tag"), Some("a/b"));
    }

    #[test]
    fn method_registration_overwrites() {
        let mut router = Router::new();
        let first = noop();
        let second = noop();
        router.route(Method::GET, "/dup", vec![first]);
        router.route(Method::GET, "/dup", vec![second.clone()]);
        let hit = router.lookup(&Method::GET, "/dup").unwrap();
        assert!(Arc::ptr_eq(&hit.chain[0], &second));
    }

    #[test]
    fn root_path_routes() {
        let router = router_with(&[(Method::GET, "/")]);
        assert!(router.lookup(&Method::GET, "/").is_some());
        assert!(router.lookup(&Method::GET, "/other").is_none());
    }

    #[test]
    fn merge_overlays_and_overwrites() {
        let mut base = router_with(&[(Method::GET, "/keep"), (Method::GET, "/conflict")]);
        let mut incoming = Router::new();
        let winner = noop();
        incoming.route(Method::GET, "/conflict", vec![winner.clone()]);
        incoming.route(Method::GET, "/new", vec![noop()]);

        base.merge(incoming);
        assert!(base.lookup(&Method::GET, "/keep").is_some());
        assert!(base.lookup(&Method::GET, "/new").is_some());
        let hit = base.lookup(&Method::GET, "/conflict").unwrap();
        assert!(Arc::ptr_eq(&hit.chain[0], &winner));
    }

    #[test]
    fn nest_mounts_routes_and_scopes_middleware() {
        let mut api = Router::new();
        api.route(Method::GET, "/widgets/:id", vec![noop()]);
        api.middleware(|req: crate::Request, res: crate::Response| async move {
            Flow::Next(req, res)
        });

        let mut root = Router::new();
        root.nest("/api", api);

        let hit = root.lookup(&Method::GET, "/api/widgets/7").unwrap();
        assert_eq!(hit.params.get("id"), Some("7"));
        assert!(root.lookup(&Method::GET, "/widgets/7").is_none());

        assert_eq!(root.middlewares_for("/api/widgets/7").len(), 1);
        assert_eq!(root.middlewares_for("/other").len(), 0);
    }

    #[test]
    fn cache_serves_hits_and_mutation_invalidates() {
        let mut router = Router::new();
        router.enable_cache(16, 16);
        router.route(Method::GET, "/v/:n", vec![noop()]);

        let first = router.lookup(&Method::GET, "/v/1").unwrap();
        assert_eq!(first.params.get("n"), Some("1"));
        // second lookup is a cache hit and must agree
        let second = router.lookup(&Method::GET, "/v/1").unwrap();
        assert_eq!(second.params.get("n"), Some("1"));
        assert!(Arc::ptr_eq(&first.chain[0], &second.chain[0]));

        // mutation: the replacement chain must be visible immediately
        let replacement = noop();
        router.route(Method::GET, "/v/:n", vec![replacement.clone()]);
        let third = router.lookup(&Method::GET, "/v/1").unwrap();
        assert!(Arc::ptr_eq(&third.chain[0], &replacement));
    }

    #[test]
    fn exact_map_covers_only_static_routes() {
        let mut router = Router::new();
        router.enable_cache(16, 16);
        router.route(Method::GET, "/static/path", vec![noop()]);
        router.route(Method::GET, "/param/:x", vec![noop()]);

        let caches = router.caches.as_ref().unwrap();
        let exact = caches.exact.read().unwrap();
        assert!(exact.contains_key("GET:/static/path"));
        assert!(!exact.keys().any(|k| k.contains("param")));
    }

    #[test]
    fn middleware_order_is_registration_order() {
        use crate::{Request, Response};
        let mut router = Router::new();
        router.middleware(|req: Request, res: Response| async move { Flow::Next(req, res) });
        router.middleware_at("/api", |req: Request, res: Response| async move {
            Flow::Next(req, res)
        });
        router.middleware(|req: Request, res: Response| async move { Flow::Next(req, res) });

        assert_eq!(router.middlewares_for("/api/x").len(), 3);
        assert_eq!(router.middlewares_for("/misc").len(), 2);
    }

    #[test]
    fn pattern_matcher_semantics() {
        assert!(pattern_match("*.js", "app.js"));
        assert!(pattern_match("foo*", "foobar"));
        assert!(pattern_match("*bar*", "xbary"));
        assert!(pattern_match("a*c", "abc"));
        assert!(pattern_match("a*c", "ac"));
        assert!(!pattern_match("*.js", "app.css"));
        assert!(!pattern_match("foo*", "barfoo"));
    }
}
