use crate::core::{Block, CancellationToken, ProofOfWork};
use crate::error::{BlockchainError, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

type FoundHandler = Box<dyn FnOnce(Block) + Send + 'static>;

struct MiningJob {
    proposal: Block,
    endpoint_id: u32,
    target_height: u64,
    token: CancellationToken,
    on_found: FoundHandler,
}

/// Outstanding searches keyed by the height they would produce
#[derive(Default)]
struct TokenRegistry {
    by_height: BTreeMap<u64, Vec<CancellationToken>>,
    settled_height: Option<u64>,
}

impl TokenRegistry {
    fn register(&mut self, height: u64) -> CancellationToken {
        let token = CancellationToken::new();
        if self.settled_height.is_some_and(|settled| height <= settled) {
            token.cancel();
        } else {
            self.by_height.entry(height).or_default().push(token.clone());
        }
        token
    }

    fn release(&mut self, height: u64, token: &CancellationToken) {
        if let Some(tokens) = self.by_height.get_mut(&height) {
            tokens.retain(|t| !t.same_as(token));
            if tokens.is_empty() {
                self.by_height.remove(&height);
            }
        }
    }

    fn cancel_up_to(&mut self, height: u64) -> usize {
        self.settled_height = Some(self.settled_height.map_or(height, |h| h.max(height)));
        let keep = self.by_height.split_off(&height.saturating_add(1));
        let cancelled = std::mem::replace(&mut self.by_height, keep);
        let mut count = 0;
        for token in cancelled.into_values().flatten() {
            token.cancel();
            count += 1;
        }
        count
    }

    fn cancel_all(&mut self) {
        for token in std::mem::take(&mut self.by_height).into_values().flatten() {
            token.cancel();
        }
    }
}

/// Bounded pool of proof-of-work workers.
///
/// Every proposal becomes a job with its own cancellation token, registered
/// under the height the search would produce. Once a block at some height is
/// accepted, `cancel_up_to` stops every search that can only yield a stale
/// candidate.
pub struct MinerPool {
    sender: Mutex<Option<Sender<MiningJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    registry: Arc<Mutex<TokenRegistry>>,
}

impl MinerPool {
    pub fn new(workers: usize, queue_depth: usize, difficulty: usize) -> MinerPool {
        let (sender, receiver) = bounded::<MiningJob>(queue_depth.max(1));
        let registry = Arc::new(Mutex::new(TokenRegistry::default()));

        let mut handles = Vec::new();
        for worker_id in 0..workers.max(1) {
            let receiver = receiver.clone();
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                Self::worker_loop(worker_id, receiver, registry, difficulty)
            }));
        }

        MinerPool {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            registry,
        }
    }

    /// Queue a search on top of `proposal`. `on_found` receives the assembled
    /// candidate on a worker thread. Fails when the queue is full or closed.
    pub fn submit<F>(&self, proposal: Block, endpoint_id: u32, on_found: F) -> Result<()>
    where
        F: FnOnce(Block) + Send + 'static,
    {
        let target_height = proposal.get_height().checked_add(1).ok_or_else(|| {
            BlockchainError::Mining(format!(
                "Proposal from endpoint {endpoint_id} is already at the maximum height"
            ))
        })?;
        let token = match self.registry.lock() {
            Ok(mut registry) => registry.register(target_height),
            Err(_) => {
                return Err(BlockchainError::Mining(
                    "Mining registry lock poisoned".to_string(),
                ))
            }
        };
        if token.is_cancelled() {
            info!("Dropping proposal from endpoint {endpoint_id}: height {target_height} already settled");
            return Ok(());
        }

        let job = MiningJob {
            proposal,
            endpoint_id,
            target_height,
            token: token.clone(),
            on_found: Box::new(on_found),
        };

        let sender = self
            .sender
            .lock()
            .map_err(|_| BlockchainError::Mining("Mining queue lock poisoned".to_string()))?;
        let result = match sender.as_ref() {
            Some(sender) => sender.try_send(job).map_err(|e| match e {
                TrySendError::Full(_) => BlockchainError::Mining(format!(
                    "Mining queue full, dropping proposal for height {target_height}"
                )),
                TrySendError::Disconnected(_) => {
                    BlockchainError::Mining("Mining pool has shut down".to_string())
                }
            }),
            None => Err(BlockchainError::Mining(
                "Mining pool has shut down".to_string(),
            )),
        };

        if result.is_err() {
            self.release(target_height, &token);
        }
        result
    }

    /// Cancel every outstanding search targeting `height` or below
    pub fn cancel_up_to(&self, height: u64) -> usize {
        match self.registry.lock() {
            Ok(mut registry) => {
                let cancelled = registry.cancel_up_to(height);
                if cancelled > 0 {
                    info!("Cancelled {cancelled} searches at or below height {height}");
                }
                cancelled
            }
            Err(_) => {
                error!("Failed to acquire mining registry lock");
                0
            }
        }
    }

    /// Number of searches queued or running
    pub fn outstanding(&self) -> usize {
        match self.registry.lock() {
            Ok(registry) => registry.by_height.values().map(Vec::len).sum(),
            Err(_) => {
                error!("Failed to acquire mining registry lock");
                0
            }
        }
    }

    /// Cancel all searches, close the queue and wait for the workers
    pub fn shutdown(&self) {
        match self.registry.lock() {
            Ok(mut registry) => registry.cancel_all(),
            Err(_) => error!("Failed to acquire mining registry lock"),
        }
        match self.sender.lock() {
            Ok(mut sender) => drop(sender.take()),
            Err(_) => error!("Failed to acquire mining queue lock"),
        }
        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => {
                error!("Failed to acquire mining worker lock");
                return;
            }
        };
        for handle in handles {
            if handle.join().is_err() {
                warn!("A mining worker panicked");
            }
        }
    }

    fn release(&self, height: u64, token: &CancellationToken) {
        match self.registry.lock() {
            Ok(mut registry) => registry.release(height, token),
            Err(_) => error!("Failed to acquire mining registry lock"),
        }
    }

    fn worker_loop(
        worker_id: usize,
        receiver: Receiver<MiningJob>,
        registry: Arc<Mutex<TokenRegistry>>,
        difficulty: usize,
    ) {
        while let Ok(job) = receiver.recv() {
            let MiningJob {
                proposal,
                endpoint_id,
                target_height,
                token,
                on_found,
            } = job;

            if token.is_cancelled() {
                debug!("Worker {worker_id} skipping cancelled search for height {target_height}");
            } else {
                let mut pow = ProofOfWork::for_proposal(&proposal, difficulty);
                if let Some(nonce) = pow.run(&token) {
                    info!("Solution found for endpoint {endpoint_id}: {nonce}");
                    match ProofOfWork::assemble_candidate(&proposal, nonce) {
                        Ok(candidate) => on_found(candidate),
                        Err(e) => error!("Failed to assemble block {target_height}: {e}"),
                    }
                }
            }

            match registry.lock() {
                Ok(mut registry) => registry.release(target_height, &token),
                Err(_) => error!("Failed to acquire mining registry lock"),
            }
        }
        debug!("Mining worker {worker_id} stopped");
    }
}
