use skyrocket::prelude::*;

const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Skyrocket Chat</title>
    <style>
        body { font-family: sans-serif; max-width: 700px; margin: 40px auto; }
        #messages { border: 1px solid #ccc; height: 360px; overflow-y: scroll; padding: 8px; }
        #input { width: 75%; padding: 8px; }
    </style>
</head>
<body>
    <h1>Skyrocket Chat</h1>
    <div id="messages"></div>
    <input type="text" id="input" placeholder="Say something...">
    <button id="send">Send</button>
    <script>
        const ws = new WebSocket('ws://' + window.location.host + '/ws/lobby');
        const messages = document.getElementById('messages');
        const input = document.getElementById('input');
        ws.onmessage = (event) => {
            const div = document.createElement('div');
            div.textContent = event.data;
            messages.appendChild(div);
            messages.scrollTop = messages.scrollHeight;
        };
        function send() {
            if (input.value && ws.readyState === WebSocket.OPEN) {
                ws.send(input.value);
                input.value = '';
            }
        }
        document.getElementById('send').onclick = send;
        input.onkeypress = (e) => { if (e.key === 'Enter') send(); };
    </script>
</body>
</html>"#;

#[tokio::main]
async fn main() -> skyrocket::Result<()> {
    env_logger::init();

    let server = Server::new()
        .get("/", |_req: Request, res: Response| async move {
            Flow::Stop(res.html(PAGE))
        })
        .ws("/ws/:room", |mut ws: WebSocket| async move {
            let room = ws.params().get("room").unwrap_or("lobby").to_string();
            ws.join(&room);
            let _ = ws.send_text(format!("welcome to #{}", room));
            ws.broadcast_to_room(&room, Message::text(format!("{} joined", ws.id())));

            while let Some(msg) = ws.recv().await {
                match msg {
                    Message::Text(text) => {
                        ws.broadcast_to_room(&room, Message::text(format!("{}: {}", ws.id(), text)));
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }

            ws.leave(&room);
        });

    println!("chat running on http://127.0.0.1:8080");
    server.listen("127.0.0.1:8080").await
}
