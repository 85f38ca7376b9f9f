// graph_ingest/src/testing.rs
// Minimal HTTP endpoints for exercising the HTTP clients in unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Reads one full request (headers plus `Content-Length` body) off the socket.
pub async fn read_request(socket: &mut TcpStream,) -> String {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf,).await.unwrap();
        if n == 0 {
            break;
        }
        received.extend_from_slice(&buf[..n],);
        let text = String::from_utf8_lossy(&received,).to_string();
        if let Some(split,) = text.find("\r\n\r\n",) {
            let content_length = text[..split]
                .lines()
                .find_map(|l| {
                    l.to_lowercase()
                        .strip_prefix("content-length:",)
                        .map(|v| v.trim().parse::<usize>().unwrap_or(0,),)
                },)
                .unwrap_or(0,);
            if received.len() >= split + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&received,).to_string()
}

/// Serves exactly one canned response on `path` and returns the raw request it saw.
pub async fn serve_once(path: &str, status_line: &'static str, body: &'static str,) -> (String, JoinHandle<String,>,) {
    let listener = TcpListener::bind("127.0.0.1:0",).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _,) = listener.accept().await.unwrap();
        let received = read_request(&mut socket,).await;
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes(),).await.unwrap();
        received
    },);
    (format!("http://{}{}", addr, path), handle,)
}

/// Reads each request in full and then hangs up without answering.
/// Returns the endpoint and a counter of requests read.
pub async fn serve_hang_ups(path: &str,) -> (String, Arc<AtomicUsize,>,) {
    let listener = TcpListener::bind("127.0.0.1:0",).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(AtomicUsize::new(0,),);
    let counter = seen.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _,),) = listener.accept().await {
            read_request(&mut socket,).await;
            counter.fetch_add(1, Ordering::SeqCst,);
            drop(socket,);
        }
    },);
    (format!("http://{}{}", addr, path), seen,)
}

/// An address nothing listens on, so connecting fails before any byte is sent.
pub async fn closed_endpoint(path: &str,) -> String {
    let listener = TcpListener::bind("127.0.0.1:0",).await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener,);
    format!("http://{}{}", addr, path)
}
