/*!
Bit-flip detection loop.

Takes a reference read of one register block, then keeps re-reading it at a
fixed interval and compares byte for byte. On a mismatch a [`BitFlipEvent`]
is emitted; without corrective actions the loop ends there, otherwise the
actions re-write known-good contents and polling continues against the
first reference.
*/

use chrono::{DateTime, Local};
use crossbeam_channel::Sender;
use mimosis::{Chip, ChipError, ReadCorruption, RegisterBlock, Transport};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::shutdown::ShutdownSignal;
use crate::subscriber::{PositionHandle, ScanPosition};

/// Errors that end a search early
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("polling interval must be positive")]
    InvalidInterval,

    #[error("chip access failed: {0}")]
    Chip(#[from] ChipError),

    #[error("search task failed: {0}")]
    Task(String),
}

/// Boxed read of one register block
pub type ReadFn<T> = Box<dyn FnMut(&mut Chip<T>) -> mimosis::Result<Vec<u8>> + Send>;

/// Boxed register re-write
pub type ActionFn<T> = Box<dyn FnMut(&mut Chip<T>) -> mimosis::Result<()> + Send>;

/// Named read function polled by the loop
pub struct RegisterProbe<T> {
    name: String,
    read: ReadFn<T>,
}

impl<T: Transport> RegisterProbe<T> {
    /// Probe reading a whole register block
    pub fn block(block: RegisterBlock) -> Self {
        Self::custom(format!("read{}", block), move |chip: &mut Chip<T>| chip.read_block_vec(block))
    }

    /// Probe with an arbitrary read function
    pub fn custom(
        name: impl Into<String>,
        read: impl FnMut(&mut Chip<T>) -> mimosis::Result<Vec<u8>> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            read: Box::new(read),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Named corrective action run after a mismatch
pub struct CorrectiveAction<T> {
    name: String,
    action: ActionFn<T>,
}

impl<T: Transport> CorrectiveAction<T> {
    /// Re-write `block` from the chip's loaded defaults
    pub fn rewrite_default(block: RegisterBlock) -> Self {
        Self::custom(format!("write{}", block), move |chip: &mut Chip<T>| {
            chip.write_block_or_default(block, None).map(|_| ())
        })
    }

    /// Action with an arbitrary body
    pub fn custom(
        name: impl Into<String>,
        action: impl FnMut(&mut Chip<T>) -> mimosis::Result<()> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            action: Box::new(action),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One detected mismatch between reference and observed snapshots
#[derive(Debug, Clone, PartialEq)]
pub struct BitFlipEvent {
    pub source: String,
    pub iteration: u64,
    pub timestamp: DateTime<Local>,
    pub reference: Vec<u8>,
    pub observed: Vec<u8>,
    pub position: ScanPosition,
}

impl BitFlipEvent {
    /// First byte index where the snapshots differ
    pub fn first_difference(&self) -> Option<usize> {
        first_difference(&self.reference, &self.observed)
    }

    /// All differing byte indices
    pub fn differing_indices(&self) -> Vec<usize> {
        self.reference
            .iter()
            .zip(&self.observed)
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(i, _)| i)
            .collect()
    }

    /// Number of bits that differ
    pub fn flipped_bits(&self) -> u32 {
        self.reference
            .iter()
            .zip(&self.observed)
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    /// One line description of where and how much the snapshots differ
    pub fn summary(&self) -> String {
        let first = self
            .first_difference()
            .map_or_else(|| "-".to_string(), |i| i.to_string());
        format!(
            "{} at iteration {}: {} bit(s) in {} byte(s), first at byte {}, scan {}",
            self.source,
            self.iteration,
            self.flipped_bits(),
            self.differing_indices().len(),
            first,
            self.position
        )
    }
}

/// Index of the first differing byte; a length difference counts at the shorter end
pub fn first_difference(reference: &[u8], observed: &[u8]) -> Option<usize> {
    reference
        .iter()
        .zip(observed)
        .position(|(a, b)| a != b)
        .or_else(|| (reference.len() != observed.len()).then(|| reference.len().min(observed.len())))
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Mismatch found and no corrective actions configured
    BitFlipFound,
    /// Shutdown requested
    Cancelled,
    /// Configured iteration limit reached
    IterationLimit,
    /// The beam position feed ended
    FeedClosed,
}

/// Summary returned when the loop ends
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub iterations: u64,
    pub events: u64,
    pub last_event: Option<BitFlipEvent>,
    pub stop: StopReason,
}

/// Loop timing and fault injection
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub interval: Duration,
    pub max_iterations: Option<u64>,
    pub read_corruption: Option<ReadCorruption>,
}

impl SearchSettings {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_iterations: None,
            read_corruption: None,
        }
    }
}

/// The polling loop and everything it owns
pub struct BitFlipSearch<T> {
    chip: Chip<T>,
    probe: RegisterProbe<T>,
    corrective: Vec<CorrectiveAction<T>>,
    settings: SearchSettings,
    events: Sender<BitFlipEvent>,
    position: PositionHandle,
}

impl<T: Transport> BitFlipSearch<T> {
    /// Create a search; events are sent to `events` as they are found
    pub fn new(
        chip: Chip<T>,
        probe: RegisterProbe<T>,
        settings: SearchSettings,
        events: Sender<BitFlipEvent>,
    ) -> Result<Self, SearchError> {
        if settings.interval.is_zero() {
            return Err(SearchError::InvalidInterval);
        }

        Ok(Self {
            chip,
            probe,
            corrective: Vec::new(),
            settings,
            events,
            position: PositionHandle::detached(),
        })
    }

    /// Actions run in order after every mismatch
    pub fn with_corrective_actions(mut self, actions: Vec<CorrectiveAction<T>>) -> Self {
        self.corrective = actions;
        self
    }

    /// Beam position used to annotate events
    pub fn with_position(mut self, position: PositionHandle) -> Self {
        self.position = position;
        self
    }

    /// Run until a terminal mismatch, the iteration limit, or shutdown
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> Result<SearchOutcome, SearchError> {
        if let Some(corruption) = self.settings.read_corruption.take() {
            info!("🧪 Simulated read bit flips enabled (p = {})", corruption.probability());
            self.chip.set_read_corruption(Some(corruption));
        }

        let reference = (self.probe.read)(&mut self.chip)?;
        info!(
            "🔍 Bit-flip search on {} every {:?}: reference {} bytes, {} ones",
            self.probe.name,
            self.settings.interval,
            reference.len(),
            crate::report::ones_in_bytes(&reference)
        );

        let mut iterations = 0u64;
        let mut events = 0u64;
        let mut last_event = None;

        let stop = loop {
            if shutdown.is_triggered() {
                break StopReason::Cancelled;
            }
            if let Some(max) = self.settings.max_iterations {
                if iterations >= max {
                    break StopReason::IterationLimit;
                }
            }

            let observed = (self.probe.read)(&mut self.chip)?;
            iterations += 1;

            if let Some(index) = first_difference(&reference, &observed) {
                let event = BitFlipEvent {
                    source: self.probe.name.clone(),
                    iteration: iterations,
                    timestamp: Local::now(),
                    reference: reference.clone(),
                    observed,
                    position: self.position.snapshot(),
                };
                warn!(
                    "💥 Bit flip in {} at byte {} (iteration {}, scan {})",
                    event.source, index, iterations, event.position
                );

                events += 1;
                if self.events.send(event.clone()).is_err() {
                    debug!("no report consumer attached");
                }
                last_event = Some(event);

                if self.corrective.is_empty() {
                    break StopReason::BitFlipFound;
                }
                for action in &mut self.corrective {
                    debug!("updating registers at iteration {}: {}", iterations, action.name);
                    (action.action)(&mut self.chip)?;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                _ = shutdown.triggered() => break StopReason::Cancelled,
            }
        };

        info!(
            "📈 Search stopped ({:?}) after {} iterations, {} bit flip event(s)",
            stop, iterations, events
        );

        Ok(SearchOutcome {
            iterations,
            events,
            last_event,
            stop,
        })
    }
}
