use tcp_to_http::config::{Config, RuntimeFlavor};
use tcp_to_http::http::headers::Headers;
use tcp_to_http::http::request::Request;
use tcp_to_http::http::response::StatusCode;
use tcp_to_http::http::writer::ResponseWriter;
use tcp_to_http::server::{Server, Shutdown};

fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(cfg.log_level()?)
        .init();

    let runtime = match cfg.runtime.flavor {
        RuntimeFlavor::CurrentThread => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?,
        RuntimeFlavor::MultiThread => {
            let mut builder = tokio::runtime::Builder::new_multi_thread();
            if let Some(workers) = cfg.runtime.worker_threads {
                builder.worker_threads(workers);
            }
            builder.enable_all().build()?
        }
    };

    runtime.block_on(serve(cfg))
}

async fn serve(cfg: Config) -> anyhow::Result<()> {
    let mut server = Server::new(cfg);
    server.register_handler("/", hello);
    server.register_handler("/echo", echo);
    server.register_handler("/stream", stream);

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();

    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown signal received");
        shutdown.trigger();
    });

    server.listen(signal).await?;
    tracing::info!("Server stopped cleanly");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn hello(w: &mut ResponseWriter, _req: &Request) -> anyhow::Result<()> {
    w.write_response(StatusCode::OK, None, "Hello from tcp-to-http\n")?;
    Ok(())
}

fn echo(w: &mut ResponseWriter, req: &Request) -> anyhow::Result<()> {
    w.write_response(StatusCode::OK, None, &req.body)?;
    Ok(())
}

fn stream(w: &mut ResponseWriter, _req: &Request) -> anyhow::Result<()> {
    let mut headers = Headers::new();
    headers.set("content-type", "text/plain");
    headers.set("transfer-encoding", "chunked");
    headers.set("trailer", "x-content-length");
    headers.set("connection", "close");

    w.write_status_line(StatusCode::OK)?;
    w.write_headers(&headers)?;

    let mut total = 0;
    for i in 0..5 {
        let line = format!("chunk {i}\n");
        total += line.len();
        w.write_chunked_body(line.as_bytes())?;
    }

    let mut trailers = Headers::new();
    trailers.set("x-content-length", total.to_string());
    w.write_trailers(&trailers)?;
    Ok(())
}
