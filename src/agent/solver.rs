//! 箭头谜题求解
//!
//! 远程求解服务：POST `{"image": <640×640 裁剪区域的 base64 JPEG>}`，
//! 请求头带 `x-rapidapi-host` / `x-rapidapi-key`；
//! 响应为 `{"solution": [...]}` 或裸数组。
//!
//! 任何失败（编码、网络、状态码、格式）都只记日志并返回空解，由状态机当作普通失败重试。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use tracing::{debug, warn};

use crate::core::AgentError;
use crate::perception::{crop_region, Frame, FrameEncoder, CROP_SIZE};

/// 谜题求解器
#[async_trait]
pub trait PuzzleSolver: Send + Sync {
    /// 返回箭头序列（`up` / `down` / `left` / `right`）；失败时返回空
    async fn solve(&self, frame: &Frame) -> Vec<String>;
}

/// 未配置求解服务时使用，总是返回空解
#[derive(Debug, Default)]
pub struct NoSolver;

#[async_trait]
impl PuzzleSolver for NoSolver {
    async fn solve(&self, _frame: &Frame) -> Vec<String> {
        Vec::new()
    }
}

pub struct HttpPuzzleSolver {
    client: reqwest::Client,
    url: String,
    host: String,
    secret: String,
    encoder: Arc<dyn FrameEncoder>,
    vertical_offset: u32,
}

impl HttpPuzzleSolver {
    pub fn new(
        url: &str,
        secret: &str,
        encoder: Arc<dyn FrameEncoder>,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| AgentError::Solver(format!("invalid solver url '{url}': {e}")))?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(AgentError::Solver(format!("solver url '{url}' has no host"))),
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Solver(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            host,
            secret: secret.to_string(),
            encoder,
            vertical_offset: 50,
        })
    }

    async fn request(&self, frame: &Frame) -> Result<Vec<String>, AgentError> {
        let region = crop_region(frame.width, frame.height, CROP_SIZE, self.vertical_offset);
        let jpeg = self.encoder.jpeg(frame, region)?;
        let body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(jpeg),
        });

        let resp = self
            .client
            .post(&self.url)
            .header("x-rapidapi-host", &self.host)
            .header("x-rapidapi-key", &self.secret)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Solver(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::Solver(format!("API error {status}: {text}")));
        }
        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AgentError::Solver(e.to_string()))?;
        parse_solution(value)
    }
}

#[async_trait]
impl PuzzleSolver for HttpPuzzleSolver {
    async fn solve(&self, frame: &Frame) -> Vec<String> {
        match self.request(frame).await {
            Ok(solution) => {
                debug!(?solution, "Solver responded");
                solution
            }
            Err(e) => {
                warn!("Puzzle solver failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// `{"solution": [...]}` 或裸数组
pub fn parse_solution(value: serde_json::Value) -> Result<Vec<String>, AgentError> {
    let list = match value {
        serde_json::Value::Object(mut map) => map
            .remove("solution")
            .ok_or_else(|| AgentError::Solver("response has no 'solution'".to_string()))?,
        other => other,
    };
    let serde_json::Value::Array(items) = list else {
        return Err(AgentError::Solver("solution is not a list".to_string()));
    };
    items
        .into_iter()
        .map(|item| match item {
            serde_json::Value::String(s) => Ok(s.trim().to_ascii_lowercase()),
            other => Err(AgentError::Solver(format!("unexpected solution item {other}"))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::Rect;
    use parking_lot::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct StubEncoder {
        regions: Mutex<Vec<Rect>>,
    }

    impl FrameEncoder for StubEncoder {
        fn jpeg(&self, _frame: &Frame, region: Rect) -> Result<Vec<u8>, AgentError> {
            self.regions.lock().push(region);
            Ok(vec![0xff, 0xd8, 0xff])
        }

        fn png(&self, _frame: &Frame, _region: Rect) -> Result<Vec<u8>, AgentError> {
            Ok(Vec::new())
        }
    }

    fn encoder() -> Arc<StubEncoder> {
        Arc::new(StubEncoder {
            regions: Mutex::new(Vec::new()),
        })
    }

    /// 只应答一次的 HTTP 服务，返回收到的原始请求
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{addr}/predict"), handle)
    }

    #[test]
    fn test_parse_solution_shapes() {
        let wrapped = serde_json::json!({"solution": ["Up", "down", "left", "right"]});
        assert_eq!(
            parse_solution(wrapped).unwrap(),
            vec!["up", "down", "left", "right"]
        );
        let bare = serde_json::json!(["left", "left"]);
        assert_eq!(parse_solution(bare).unwrap().len(), 2);
        assert!(parse_solution(serde_json::json!({"error": "x"})).is_err());
        assert!(parse_solution(serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = HttpPuzzleSolver::new("not a url", "s", encoder(), Duration::from_secs(1));
        assert!(matches!(result, Err(AgentError::Solver(_))));
    }

    #[tokio::test]
    async fn test_solve_posts_crop_and_headers() {
        let (url, server) = serve_once("200 OK", r#"{"solution": ["up", "down", "left", "right"]}"#).await;
        let enc = encoder();
        let solver = HttpPuzzleSolver::new(&url, "secret-key", enc.clone(), Duration::from_secs(5)).unwrap();

        let solution = solver.solve(&Frame::blank(1366, 768)).await;
        assert_eq!(solution, vec!["up", "down", "left", "right"]);

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("post /predict"));
        assert!(request.contains("x-rapidapi-key: secret-key"));
        assert!(request.contains("x-rapidapi-host: 127.0.0.1:"));
        assert!(request.contains("\"image\":\"/9j/\""));
        assert_eq!(
            enc.regions.lock().as_slice(),
            &[crop_region(1366, 768, CROP_SIZE, 50)]
        );
    }

    #[tokio::test]
    async fn test_solve_fails_soft_on_error_status() {
        let (url, server) = serve_once("500 Internal Server Error", r#"{"error": "boom"}"#).await;
        let solver = HttpPuzzleSolver::new(&url, "", encoder(), Duration::from_secs(5)).unwrap();
        assert!(solver.solve(&Frame::blank(800, 600)).await.is_empty());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_solver_returns_empty() {
        assert!(NoSolver.solve(&Frame::blank(4, 4)).await.is_empty());
    }
}
