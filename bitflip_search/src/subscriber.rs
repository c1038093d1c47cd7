/*!
Beam position feed.

The micro-beam control system publishes the current scan over a plain TCP
line protocol:

```text
start_run <id>
stop_run
pos <x> <y>
```

The subscriber keeps the latest [`ScanPosition`] in a watch channel. Readers
take snapshots through a [`PositionHandle`] without ever waiting on the feed.
*/

use std::fmt;
use std::num::ParseIntError;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Well-known port of the beam position publisher
pub const BEAM_FEED_PORT: u16 = 8188;

/// Longest accepted feed line in bytes, newline included
pub const MAX_LINE_LEN: usize = 256;

/// Latest known run and beam coordinates, `None` while unknown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanPosition {
    pub scan_id: Option<i64>,
    pub x: Option<i64>,
    pub y: Option<i64>,
}

impl fmt::Display for ScanPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn field(value: Option<i64>) -> String {
            value.map_or_else(|| "-".to_string(), |v| v.to_string())
        }
        write!(f, "{}:{}:{}", field(self.scan_id), field(self.x), field(self.y))
    }
}

/// One recognised feed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMessage {
    StartRun(i64),
    StopRun,
    Position { x: i64, y: i64 },
}

/// Why a single feed line was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanLineError {
    #[error("missing {field} in '{kind}' message")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("invalid {field} '{value}': {source}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("line longer than {limit} bytes")]
    TooLong { limit: usize },
}

/// Result of reading one line from the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    /// Recognised message, already applied to the position
    Update(ScanMessage),
    /// Unknown first token or empty line
    Ignored(String),
    /// Recognised message with bad fields; the position is unchanged
    Malformed(ScanLineError),
    /// End of stream
    Closed,
}

fn number(kind: &'static str, field: &'static str, token: Option<&str>) -> Result<i64, ScanLineError> {
    let value = token.ok_or(ScanLineError::MissingField { kind, field })?;
    value.parse::<i64>().map_err(|source| ScanLineError::InvalidNumber {
        field,
        value: value.to_string(),
        source,
    })
}

/// Parse one feed line. Unknown messages yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ScanMessage>, ScanLineError> {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some("start_run") => Ok(Some(ScanMessage::StartRun(number("start_run", "run id", tokens.next())?))),
        Some("stop_run") => Ok(Some(ScanMessage::StopRun)),
        Some("pos") => {
            let x = number("pos", "x", tokens.next())?;
            let y = number("pos", "y", tokens.next())?;
            Ok(Some(ScanMessage::Position { x, y }))
        }
        _ => Ok(None),
    }
}

/// Read-only view of the latest scan position
#[derive(Debug, Clone)]
pub struct PositionHandle {
    rx: watch::Receiver<ScanPosition>,
}

impl PositionHandle {
    /// Handle for runs without a beam feed, always reports unknown
    pub fn detached() -> Self {
        let (_, rx) = watch::channel(ScanPosition::default());
        Self { rx }
    }

    /// Copy of the most recently applied position
    pub fn snapshot(&self) -> ScanPosition {
        *self.rx.borrow()
    }
}

/// Long-lived reader of the beam position feed
pub struct BeamPositionSubscriber<R> {
    reader: R,
    position: watch::Sender<ScanPosition>,
    buffer: Vec<u8>,
    lines_read: u64,
}

impl BeamPositionSubscriber<BufReader<TcpStream>> {
    /// Connect to the publisher at `host`:`port`
    pub async fn connect(host: &str, port: u16) -> std::io::Result<(Self, PositionHandle)> {
        info!("🔌 Connecting to beam position feed at {}:{}", host, port);
        let stream = TcpStream::connect((host, port)).await?;
        info!("✅ Beam position feed connected");
        Ok(Self::new(BufReader::new(stream)))
    }
}

impl<R: AsyncBufRead + Unpin> BeamPositionSubscriber<R> {
    /// Subscribe to an already open line stream
    pub fn new(reader: R) -> (Self, PositionHandle) {
        let (tx, rx) = watch::channel(ScanPosition::default());
        let subscriber = Self {
            reader,
            position: tx,
            buffer: Vec::new(),
            lines_read: 0,
        };
        (subscriber, PositionHandle { rx })
    }

    /// Wait for the next line and apply it.
    ///
    /// Bad lines come back as [`FeedMessage::Malformed`]; only transport
    /// failures are errors.
    pub async fn read_msg(&mut self) -> std::io::Result<FeedMessage> {
        if self.read_bounded_line().await? == 0 {
            return Ok(FeedMessage::Closed);
        }
        self.lines_read += 1;

        if !self.buffer.ends_with(b"\n") && self.buffer.len() >= MAX_LINE_LEN {
            self.discard_rest_of_line().await?;
            return Ok(FeedMessage::Malformed(ScanLineError::TooLong { limit: MAX_LINE_LEN }));
        }

        let line = match std::str::from_utf8(&self.buffer) {
            Ok(line) => line.trim_end(),
            Err(_) => return Ok(FeedMessage::Malformed(ScanLineError::InvalidUtf8)),
        };
        debug!("beam feed: {}", line);

        match parse_line(line) {
            Ok(Some(message)) => {
                self.apply(message);
                Ok(FeedMessage::Update(message))
            }
            Ok(None) => Ok(FeedMessage::Ignored(line.to_string())),
            Err(e) => Ok(FeedMessage::Malformed(e)),
        }
    }

    /// Fill `buffer` with at most `MAX_LINE_LEN` bytes up to a newline
    async fn read_bounded_line(&mut self) -> std::io::Result<usize> {
        self.buffer.clear();
        (&mut self.reader)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', &mut self.buffer)
            .await
    }

    async fn discard_rest_of_line(&mut self) -> std::io::Result<()> {
        loop {
            let n = self.read_bounded_line().await?;
            if n == 0 || self.buffer.ends_with(b"\n") {
                return Ok(());
            }
        }
    }

    /// Read until the stream ends, returning the number of lines seen
    pub async fn run(mut self) -> std::io::Result<u64> {
        loop {
            match self.read_msg().await? {
                FeedMessage::Closed => {
                    info!("📴 Beam position feed closed after {} lines", self.lines_read);
                    return Ok(self.lines_read);
                }
                FeedMessage::Malformed(e) => warn!("⚠️ Skipping beam feed line: {}", e),
                FeedMessage::Update(_) | FeedMessage::Ignored(_) => {}
            }
        }
    }

    fn apply(&self, message: ScanMessage) {
        self.position.send_modify(|position| match message {
            ScanMessage::StartRun(id) => position.scan_id = Some(id),
            // Reserved, the run id stays until the next start_run
            ScanMessage::StopRun => {}
            ScanMessage::Position { x, y } => {
                position.x = Some(x);
                position.y = Some(y);
            }
        });
    }
}
