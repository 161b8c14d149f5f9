use crate::config::Config;
use crate::core::{signature, Block, ChainValidator};
use crate::error::{BlockchainError, Result};
use crate::network::codec::{read_message, Message};
use crate::network::miner_pool::MinerPool;
use crate::storage::{LedgerGateway, Settlement};
use log::{debug, error, info, warn};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// State shared by every connection handler and mining worker
struct NodeContext {
    ledger: Arc<dyn LedgerGateway>,
    settlement: Arc<dyn Settlement>,
    validator: ChainValidator,
    pool: MinerPool,
    max_message_bytes: usize,
}

/// Listener accepting block and transaction proposals
pub struct Server {
    listener: TcpListener,
    context: Arc<NodeContext>,
    read_timeout: Duration,
}

impl Server {
    /// Bind the listening socket and start the mining workers
    pub fn bind(
        config: &Config,
        ledger: Arc<dyn LedgerGateway>,
        settlement: Arc<dyn Settlement>,
    ) -> Result<Server> {
        config.validate()?;
        let addr = config.listen_addr.as_str();
        let listener = TcpListener::bind(addr)
            .map_err(|e| BlockchainError::Network(format!("Failed to bind to {addr}: {e}")))?;

        let context = NodeContext {
            validator: ChainValidator::new(Arc::clone(&ledger)),
            ledger,
            settlement,
            pool: MinerPool::new(
                config.mining_workers,
                config.mining_queue,
                config.difficulty,
            ),
            max_message_bytes: config.max_message_bytes,
        };

        Ok(Server {
            listener,
            context: Arc::new(context),
            read_timeout: config.read_timeout(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| BlockchainError::Network(format!("Failed to read local address: {e}")))
    }

    /// Accept connections until the socket fails; each one gets its own thread
    pub fn run(&self) -> Result<()> {
        info!("Server listening on {}", self.local_addr()?);

        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let peer_addr = match stream.peer_addr() {
                        Ok(addr) => addr,
                        Err(e) => {
                            error!("Failed to get peer address: {e}");
                            continue;
                        }
                    };

                    let context = Arc::clone(&self.context);
                    let read_timeout = self.read_timeout;
                    thread::spawn(move || {
                        if let Err(e) =
                            Self::handle_connection(&context, stream, peer_addr, read_timeout)
                        {
                            error!("Error handling connection from {peer_addr}: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {e}");
                }
            }
        }

        Ok(())
    }

    /// Stop outstanding searches and join the mining workers
    pub fn shutdown(&self) {
        self.context.pool.shutdown();
    }

    fn handle_connection(
        context: &Arc<NodeContext>,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        read_timeout: Duration,
    ) -> Result<()> {
        stream
            .set_read_timeout(Some(read_timeout))
            .map_err(|e| BlockchainError::Network(format!("Failed to set read timeout: {e}")))?;

        let message = read_message(&mut stream, context.max_message_bytes);
        let _ = stream.shutdown(Shutdown::Both);
        let message = message?;

        debug!("Received message from {peer_addr}");
        Self::process_message(context, message)
    }

    fn process_message(context: &Arc<NodeContext>, message: Message) -> Result<()> {
        match message {
            Message::BlockProposal { endpoint_id, block } => {
                Self::handle_block_proposal(context, endpoint_id, block)
            }
            Message::TransactionProposal {
                payload,
                signature,
                public_key,
                transaction_id,
            } => Self::handle_transaction_proposal(
                context,
                &payload,
                &signature,
                &public_key,
                transaction_id,
            ),
        }
    }

    fn handle_block_proposal(
        context: &Arc<NodeContext>,
        endpoint_id: u32,
        proposal: Block,
    ) -> Result<()> {
        info!(
            "Mining on block {} for endpoint {endpoint_id}",
            proposal.get_height()
        );
        let worker_context = Arc::clone(context);
        context.pool.submit(proposal, endpoint_id, move |candidate| {
            Self::settle_candidate(&worker_context, candidate, endpoint_id)
        })
    }

    // Runs on a mining worker once a nonce is found
    fn settle_candidate(context: &NodeContext, candidate: Block, endpoint_id: u32) {
        let height = candidate.get_height();
        match context.validator.submit(candidate, endpoint_id) {
            Ok(Some(drained)) => {
                context.pool.cancel_up_to(height);
                if drained.is_empty() {
                    return;
                }
                // Failures are not rolled back; earlier transfers in the batch stay applied
                if let Err(e) = context.settlement.transfer_funds(&drained) {
                    error!("Settlement of block {height} failed: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => error!("Failed to submit block {height}: {e}"),
        }
    }

    fn handle_transaction_proposal(
        context: &NodeContext,
        payload: &str,
        signature: &[u8],
        public_key: &[u8],
        transaction_id: u64,
    ) -> Result<()> {
        if !signature::verify(payload.as_bytes(), signature, public_key) {
            debug!("Dropping transaction {transaction_id}: signature does not verify");
            return Ok(());
        }

        match context.ledger.mark_transaction_valid(transaction_id) {
            Ok(()) => {
                info!("Transaction {transaction_id} verified");
                Ok(())
            }
            Err(BlockchainError::NotFound(what)) => {
                warn!("Verified signature for unknown {what}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
