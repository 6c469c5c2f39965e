//! Fakes and a loopback HTTP server shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::llm::{CodeGenerator, GeneratorFactory};
use crate::provider::{ProviderConfig, ProviderKind};
use crate::sandbox::{ContainerRuntime, ContainerSpec, ContainerState, ExecOutput};
use crate::sink::OutputSink;

type ExecScript = Box<dyn Fn(&[String]) -> ExecOutput + Send + Sync>;

/// Records every call; containers and images live in maps.
#[derive(Default)]
pub struct FakeRuntime {
    pub reachable: bool,
    pub containers: Mutex<HashMap<String, ContainerState>>,
    pub images: Mutex<HashSet<String>>,
    pub pullable: Mutex<HashSet<String>>,
    pub created: Mutex<Vec<ContainerSpec>>,
    pub builds: Mutex<Vec<(String, PathBuf)>>,
    pub pulls: Mutex<Vec<String>>,
    pub starts: Mutex<Vec<String>>,
    pub execs: Mutex<Vec<Vec<String>>>,
    script: Option<ExecScript>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            reachable: true,
            ..Self::default()
        }
    }

    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn with_image(self, image: &str) -> Self {
        self.images.lock().unwrap().insert(image.to_string());
        self
    }

    pub fn with_pullable(self, image: &str) -> Self {
        self.pullable.lock().unwrap().insert(image.to_string());
        self
    }

    pub fn with_container(self, name: &str, state: ContainerState) -> Self {
        self.containers
            .lock()
            .unwrap()
            .insert(name.to_string(), state);
        self
    }

    /// Decides the output of every exec from its argv.
    pub fn with_script<F>(mut self, script: F) -> Self
    where
        F: Fn(&[String]) -> ExecOutput + Send + Sync + 'static,
    {
        self.script = Some(Box::new(script));
        self
    }

    pub fn exec_count(&self) -> usize {
        self.execs.lock().unwrap().len()
    }
}

/// Output `ExecOutput` with exit code 0.
pub fn ok_output(text: &str) -> ExecOutput {
    ExecOutput {
        output: text.to_string(),
        exit_code: Some(0),
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(Error::RuntimeUnavailable(
                "Cannot connect to the Docker daemon".to_string(),
            ))
        }
    }

    async fn state(&self, name: &str) -> Result<Option<ContainerState>> {
        Ok(self.containers.lock().unwrap().get(name).copied())
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.starts.lock().unwrap().push(name.to_string());
        match self.containers.lock().unwrap().get_mut(name) {
            Some(state) => {
                *state = ContainerState::Running;
                Ok(())
            }
            None => Err(Error::Container(format!("No such container: {name}"))),
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.images.lock().unwrap().contains(image))
    }

    async fn build_image(&self, image: &str, context: &Path) -> Result<()> {
        self.builds
            .lock()
            .unwrap()
            .push((image.to_string(), context.to_path_buf()));
        self.images.lock().unwrap().insert(image.to_string());
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.pulls.lock().unwrap().push(image.to_string());
        if self.pullable.lock().unwrap().contains(image) {
            self.images.lock().unwrap().insert(image.to_string());
            Ok(())
        } else {
            Err(Error::ImageResolution {
                image: image.to_string(),
                reason: "pull access denied".to_string(),
            })
        }
    }

    async fn run_detached(&self, spec: &ContainerSpec) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(&spec.name) {
            return Err(Error::Container(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        containers.insert(spec.name.clone(), ContainerState::Running);
        self.created.lock().unwrap().push(spec.clone());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        Ok(self.containers.lock().unwrap().remove(name).is_some())
    }

    async fn exec(
        &self,
        name: &str,
        argv: &[String],
        _working_dir: &str,
        sink: &mut dyn OutputSink,
    ) -> Result<ExecOutput> {
        if self.containers.lock().unwrap().get(name) != Some(&ContainerState::Running) {
            return Err(Error::Container(format!("container {name} is not running")));
        }
        self.execs.lock().unwrap().push(argv.to_vec());
        let result = match self.script {
            Some(ref script) => script(argv),
            None => ok_output(&format!("ran: {}\n", argv.last().cloned().unwrap_or_default())),
        };
        // Emit line by line to exercise chunked forwarding
        for line in result.output.split_inclusive('\n') {
            sink.emit(line);
        }
        Ok(result)
    }
}

/// Generator replaying canned responses, one per call.
pub struct ScriptedGenerator {
    responses: Arc<Mutex<Vec<String>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, sink: &mut dyn OutputSink) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let response = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                String::new()
            } else {
                responses.remove(0)
            }
        };
        // Stream in small pieces like a token stream
        for token in response.split_inclusive(' ') {
            sink.emit(token);
        }
        Ok(response)
    }

    fn description(&self) -> String {
        "scripted".to_string()
    }
}

/// Factory handing out [`ScriptedGenerator`]s sharing one response queue.
#[derive(Default, Clone)]
pub struct ScriptedFactory {
    pub responses: Arc<Mutex<Vec<String>>>,
    pub prompts: Arc<Mutex<Vec<String>>>,
    pub kinds: Arc<Mutex<Vec<ProviderKind>>>,
    pub fail_with: Arc<Mutex<Option<String>>>,
}

impl ScriptedFactory {
    pub fn with_responses(responses: &[&str]) -> Self {
        let factory = Self::default();
        *factory.responses.lock().unwrap() = responses.iter().map(|r| r.to_string()).collect();
        factory
    }
}

struct FailingGenerator {
    reason: String,
    endpoint: String,
}

#[async_trait]
impl CodeGenerator for FailingGenerator {
    async fn generate(&self, _prompt: &str, _sink: &mut dyn OutputSink) -> Result<String> {
        Err(Error::BackendUnavailable {
            provider: "ollama".to_string(),
            endpoint: self.endpoint.clone(),
            reason: self.reason.clone(),
        })
    }

    fn description(&self) -> String {
        "failing".to_string()
    }
}

impl GeneratorFactory for ScriptedFactory {
    fn build(&self, config: &ProviderConfig) -> Result<Box<dyn CodeGenerator>> {
        self.kinds.lock().unwrap().push(config.kind);
        if let Some(reason) = self.fail_with.lock().unwrap().clone() {
            return Ok(Box::new(FailingGenerator {
                reason,
                endpoint: config.ollama_base_url.clone(),
            }));
        }
        Ok(Box::new(ScriptedGenerator {
            responses: Arc::clone(&self.responses),
            prompts: Arc::clone(&self.prompts),
        }))
    }
}

/// One-shot HTTP server on 127.0.0.1.
///
/// Answers the first request with `status` and a chunked body, one HTTP
/// chunk per entry with a short pause in between so the client sees them
/// as separate reads. Returns the base URL and a receiver for the request
/// line (`"POST /api/generate HTTP/1.1"`).
pub async fn serve_chunked(status: &str, chunks: &[&str]) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let status = status.to_string();
    let chunks: Vec<String> = chunks.iter().map(|c| c.to_string()).collect();
    let (request_tx, request_rx) = oneshot::channel();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let request_line = read_request(&mut socket).await;
        let _ = request_tx.send(request_line);

        let head = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/x-ndjson\r\n\
             transfer-encoding: chunked\r\nconnection: close\r\n\r\n"
        );
        // The client may hang up early; write errors are expected then
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        for chunk in chunks.iter().filter(|c| !c.is_empty()) {
            let frame = format!("{:x}\r\n{chunk}\r\n", chunk.len());
            if socket.write_all(frame.as_bytes()).await.is_err() {
                return;
            }
            let _ = socket.flush().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let _ = socket.write_all(b"0\r\n\r\n").await;
        let _ = socket.shutdown().await;
    });

    (format!("http://{addr}"), request_rx)
}

/// Reads headers and body of one request, returns its request line.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    let header_end = loop {
        let n = socket.read(&mut tmp).await.unwrap_or(0);
        if n == 0 {
            return String::new();
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = socket.read(&mut tmp).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
    }

    head.lines().next().unwrap_or_default().to_string()
}
