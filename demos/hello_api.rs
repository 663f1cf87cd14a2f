use skyrocket::prelude::*;

#[tokio::main]
async fn main() -> skyrocket::Result<()> {
    env_logger::init();

    let server = Server::new()
        .middleware(|req: Request, res: Response| async move {
            log::info!("{} {}", req.method, req.path());
            Flow::Next(req, res)
        })
        .get("/", |_req: Request, res: Response| async move {
            Flow::Stop(res.text("skyrocket is up"))
        })
        .get("/users/:id", |req: Request, res: Response| async move {
            let id = req.param("id").unwrap_or("unknown").to_string();
            Flow::Stop(res.json(serde_json::json!({ "id": id })))
        })
        .get("/files/**path", |req: Request, res: Response| async move {
            let path = req.param("path").unwrap_or("").to_string();
            Flow::Stop(res.json(serde_json::json!({ "requested": path })))
        })
        .error_middleware(|err: Error, req, res: Response| async move {
            log::error!("request failed: {}", err);
            Flow::Fail(err, req, res)
        });

    println!("listening on http://127.0.0.1:8080");
    server.listen("127.0.0.1:8080").await
}
