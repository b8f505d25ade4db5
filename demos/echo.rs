//! Echo server and client sharing one TCP connection.
//!
//! ```text
//! RUST_LOG=streamwire=debug cargo run --example echo
//! ```

use std::time::Duration;

use streamwire::{
    Connection, ContentStream, ReceivedRequest, Router, StreamingRequest, StreamingResponse,
};
use tokio::net::{TcpListener, TcpStream};

async fn echo(mut req: ReceivedRequest) -> streamwire::Result<StreamingResponse> {
    let body = req.read_body().await?;
    tracing::info!("{} {} ({} bytes)", req.verb(), req.path(), body.len());
    Ok(StreamingResponse::ok().body(body))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        let (socket, peer) = listener.accept().await?;
        tracing::info!("Accepted {}", peer);

        let router = Router::new()
            .post("/echo", echo)
            .get("/health", |_req: ReceivedRequest| async {
                Ok(StreamingResponse::ok().body("ok"))
            });
        let connection = Connection::builder().handler(router).build(socket)?;
        connection.closed().await;
        Ok::<_, streamwire::StreamwireError>(())
    });

    let client = Connection::builder()
        .max_frame_size(1024)
        .request_timeout(Duration::from_secs(5))
        .build(TcpStream::connect(addr).await?)?;

    let mut health = client.send(StreamingRequest::get("/health"), None).await?;
    tracing::info!(
        "health: {} {:?}",
        health.status_code(),
        String::from_utf8_lossy(&health.read_body().await?)
    );

    let big = "streamwire ".repeat(10_000);
    let request = StreamingRequest::post("/echo").stream(ContentStream::text(big.clone()));
    let mut response = client.send(request, None).await?;
    let echoed = response.read_body().await?;
    tracing::info!(
        "echo: {} ({} bytes, intact: {})",
        response.status_code(),
        echoed.len(),
        echoed.as_ref() == big.as_bytes()
    );

    let missing = client.send(StreamingRequest::get("/missing"), None).await?;
    tracing::info!("missing: {}", missing.status_code());

    client.close();
    server.await??;
    Ok(())
}
