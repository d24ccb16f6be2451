use std::collections::BTreeMap;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::chunker::is_alpha;
use crate::config::WorkerConfig;
use crate::error::{MrError, Result};
use crate::protocol::{decode_request, encode_reply, read_frame, write_frame, MessageType};

/// Count the words of a raw text chunk.
///
/// Words are runs of ASCII letters, lowercased. Each distinct word is
/// written followed by one `1` per occurrence (`the cat the` ->
/// `cat1the11`), so outputs from different chunks can be concatenated and
/// still be merged by [`reduce`].
pub fn map(text: &[u8]) -> Vec<u8> {
    let mut counts: BTreeMap<Vec<u8>, usize> = BTreeMap::new();
    for word in text.split(|&b| !is_alpha(b)).filter(|w| !w.is_empty()) {
        *counts.entry(word.to_ascii_lowercase()).or_insert(0) += 1;
    }

    let mut out = Vec::with_capacity(text.len() + 1);
    for (word, count) in counts {
        out.extend_from_slice(&word);
        out.resize(out.len() + count, b'1');
    }
    out
}

/// Merge unary-encoded pairs into decimal counts (`the11cat1the1` ->
/// `cat1the3`).
pub fn reduce(pairs: &[u8]) -> Result<Vec<u8>> {
    let mut counts: BTreeMap<&[u8], u64> = BTreeMap::new();
    let mut word: Option<&[u8]> = None;
    let mut pos = 0;

    while pos < pairs.len() {
        let byte = pairs[pos];
        if is_alpha(byte) {
            let end = run_end(pairs, pos, is_alpha);
            word = Some(&pairs[pos..end]);
            pos = end;
        } else if byte == b'1' {
            let end = run_end(pairs, pos, |b| b == b'1');
            let Some(word) = word else {
                return Err(MrError::MalformedReduceInput { offset: pos, byte });
            };
            *counts.entry(word).or_insert(0) += (end - pos) as u64;
            pos = end;
        } else {
            return Err(MrError::MalformedReduceInput { offset: pos, byte });
        }
    }

    let mut out = Vec::new();
    for (word, count) in counts {
        out.extend_from_slice(word);
        out.extend_from_slice(count.to_string().as_bytes());
    }
    Ok(out)
}

fn run_end(bytes: &[u8], start: usize, pred: impl Fn(u8) -> bool) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| !pred(b))
        .map_or(bytes.len(), |len| start + len)
}

enum Flow {
    Listening,
    Shutdown,
}

/// One worker endpoint. Requests are served strictly one at a time.
pub struct Worker {
    listener: TcpListener,
    port: u16,
}

impl Worker {
    pub async fn bind(host: &str, port: u16) -> Result<Worker> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| MrError::Bind { port, source })?;
        let port = listener.local_addr()?.port();
        Ok(Worker { listener, port })
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Serve until a shutdown request has been acknowledged.
    pub async fn start(self) -> Result<()> {
        info!(port = self.port, "worker listening");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!(port = self.port, %peer, "accepted request");
            if let Flow::Shutdown = self.handle(stream).await? {
                info!(port = self.port, "worker shut down");
                return Ok(());
            }
        }
    }

    async fn handle(&self, mut stream: TcpStream) -> Result<Flow> {
        let frame = match read_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(port = self.port, "discarding unreadable request: {}", e);
                return Ok(Flow::Listening);
            }
        };

        let (kind, payload) = decode_request(&frame);
        let (reply, flow) = match kind {
            MessageType::Map => {
                let counted = map(payload);
                (encode_reply(MessageType::Empty, &counted)?, Flow::Listening)
            }
            MessageType::Reduce => {
                let merged = reduce(payload).inspect_err(|e| {
                    error!(port = self.port, "reduce failed: {}", e);
                })?;
                (encode_reply(MessageType::Empty, &merged)?, Flow::Listening)
            }
            MessageType::Shutdown => {
                (encode_reply(MessageType::Shutdown, b"")?, Flow::Shutdown)
            }
            MessageType::Empty | MessageType::Invalid => {
                warn!(port = self.port, "no command in request, listening for the next one");
                return Ok(Flow::Listening);
            }
        };

        debug!(port = self.port, command = %kind, bytes = reply.len(), "replying");
        write_frame(&mut stream, &reply).await?;
        Ok(flow)
    }
}

/// Bind every configured port and serve them concurrently until each one
/// has been shut down.
pub async fn make_worker(config: WorkerConfig) -> Result<()> {
    let mut endpoints = JoinSet::new();
    for &port in &config.ports {
        let worker = Worker::bind(&config.bind, port).await?;
        endpoints.spawn(worker.start());
    }

    let mut failure = None;
    while let Some(joined) = endpoints.join_next().await {
        let outcome = joined.map_err(|e| MrError::Io(std::io::Error::other(e)));
        if let Err(e) = outcome.and_then(|served| served) {
            error!("worker endpoint failed: {}", e);
            failure.get_or_insert(e);
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
