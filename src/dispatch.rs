use crate::error::Error;
use crate::request::{Method, Request};
use crate::response::{Response, StatusCode};
use crate::router::Router;
use crate::{Flow, HandlerRef};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

/// Run one request through the full pipeline: pre-route middleware, route
/// lookup, the handler chain, and on any failure the error chain.
///
/// The returned response is written to the wire only when its sent flag is
/// set; a chain that drains without terminating leaves the request hanging,
/// which is the handler's contract.
pub async fn dispatch(router: &Router, req: Request) -> Response {
    let started = Instant::now();
    let res = dispatch_inner(router, req).await;
    if let Some(perf) = &router.perf {
        perf.record_dispatch(started.elapsed());
        perf.record_bytes_out(res.body_bytes().len());
    }
    res
}

async fn dispatch_inner(router: &Router, mut req: Request) -> Response {
    req.prime_url(router.url_parts_for(&req.raw_url));
    let path = req.path().to_string();

    let mut res = Response::default();
    res.set_head_only(req.method == Method::HEAD);

    for mw in router.middlewares_for(&path) {
        match run_stage(&mw, req, res).await {
            Flow::Next(r, s) => {
                req = r;
                res = s;
            }
            Flow::Stop(mut s) => {
                s.mark_sent();
                return s;
            }
            Flow::Fail(err, r, s) => return run_error_chain(router, err, r, s).await,
        }
    }

    let matched = match router.lookup(&req.method, &path) {
        Some(m) => m,
        None => {
            let err = Error::NotFound("Route Not Found".to_string());
            return default_error_response(err, res, router.debug);
        }
    };

    let chain = matched.chain.clone();
    let params = matched.params.clone();
    req.set_params(matched.params);

    for handler in chain.iter() {
        match run_stage(handler, req, res).await {
            Flow::Next(r, s) => {
                req = r;
                res = s;
            }
            Flow::Stop(mut s) => {
                s.mark_sent();
                router.pool.reclaim(params);
                return s;
            }
            Flow::Fail(err, r, s) => {
                let out = run_error_chain(router, err, r, s).await;
                router.pool.reclaim(params);
                return out;
            }
        }
    }

    // drained without termination
    drop(req);
    router.pool.reclaim(params);
    res
}

/// Invoke one middleware or handler, converting a panic (sync or mid-await)
/// into an error-chain entry.
async fn run_stage(handler: &HandlerRef, req: Request, res: Response) -> Flow {
    let req_backup = req.clone();
    let res_backup = res.clone();
    match AssertUnwindSafe(handler.call(req, res)).catch_unwind().await {
        Ok(flow) => flow,
        Err(panic) => Flow::Fail(
            Error::Internal(panic_message(panic.as_ref())),
            req_backup,
            res_backup,
        ),
    }
}

async fn run_error_chain(
    router: &Router,
    mut err: Error,
    mut req: Request,
    mut res: Response,
) -> Response {
    for handler in router.error_chain() {
        let err_backup = err.clone();
        let req_backup = req.clone();
        let res_backup = res.clone();
        let flow = match AssertUnwindSafe(handler.call(err, req, res))
            .catch_unwind()
            .await
        {
            Ok(flow) => flow,
            Err(panic) => Flow::Fail(
                Error::Internal(panic_message(panic.as_ref())),
                req_backup,
                res_backup,
            ),
        };
        match flow {
            Flow::Next(r, s) => {
                // not handled here; the same error continues down the chain
                err = err_backup;
                req = r;
                res = s;
            }
            Flow::Stop(mut s) => {
                s.mark_sent();
                return s;
            }
            Flow::Fail(e, r, s) => {
                err = e;
                req = r;
                res = s;
            }
        }
    }
    default_error_response(err, res, router.debug)
}

/// Terminal error writer: JSON body with an explicit numeric status.
/// Detects an already-terminated response and drops its own output instead
/// of double-emitting.
fn default_error_response(err: Error, res: Response, debug: bool) -> Response {
    if res.is_sent() {
        log::error!("error surfaced after response termination: {}", err);
        return res;
    }
    let status = StatusCode::from_u16(err.status_code());
    let mut out = res.status(status).json(err.to_json_body(debug));
    out.mark_sent();
    out
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
