use crate::config::Config;
use crate::core::{signature, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::codec::{encode, Message, WireFormat};
use crate::storage::LedgerGateway;
use log::{debug, info, warn};
use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

/// Outbound side: pushes signed transactions to the listener and the current
/// tip to every registered miner endpoint.
pub struct BroadcastClient {
    ledger: Arc<dyn LedgerGateway>,
    listen_addr: String,
    listener_port: u16,
    pending_threshold: usize,
    write_timeout: Duration,
    wire_format: WireFormat,
}

impl BroadcastClient {
    pub fn new(config: &Config, ledger: Arc<dyn LedgerGateway>) -> BroadcastClient {
        BroadcastClient {
            ledger,
            listen_addr: config.listen_addr.clone(),
            listener_port: config.listener_port,
            pending_threshold: config.pending_threshold,
            write_timeout: config.write_timeout(),
            wire_format: config.wire_format,
        }
    }

    /// Sign `transaction` with its sender's key and push it to the listener
    pub fn send_transaction(&self, transaction: &Transaction) -> Result<()> {
        let wallet = self
            .ledger
            .find_wallet_by_user(transaction.get_user_id())?
            .ok_or_else(|| {
                BlockchainError::Wallet(format!(
                    "No wallet for user {}",
                    transaction.get_user_id()
                ))
            })?;

        let payload = transaction.canonical_payload();
        let signature = signature::sign(wallet.get_pkcs8(), payload.as_bytes())?;
        let message =
            Message::transaction_proposal(transaction, signature, wallet.get_public_key().to_vec());

        self.send_message(&self.listen_addr, &message)?;
        info!(
            "Sent transaction {} to {}",
            transaction.get_id(),
            self.listen_addr
        );
        Ok(())
    }

    /// Push the tip to every miner endpoint once enough transactions are
    /// pending. Returns how many endpoints received it.
    pub fn broadcast_tip(&self) -> Result<usize> {
        let pending = self.ledger.pending_count()?;
        if pending <= self.pending_threshold {
            debug!(
                "{pending} pending transactions, threshold {} not exceeded",
                self.pending_threshold
            );
            return Ok(0);
        }

        let tip = self.ledger.get_latest_block()?;
        let mut sent = 0;
        for endpoint in self.ledger.list_miner_endpoints()? {
            let addr = format!("{}:{}", endpoint.get_address(), self.listener_port);
            let message = Message::block_proposal(endpoint.get_id(), tip.clone());
            match self.send_message(&addr, &message) {
                Ok(()) => sent += 1,
                Err(e) => warn!("Failed to reach miner endpoint {}: {e}", endpoint.get_id()),
            }
        }

        info!(
            "Broadcast block {} to {sent} miner endpoints",
            tip.get_height()
        );
        Ok(sent)
    }

    fn send_message(&self, addr: &str, message: &Message) -> Result<()> {
        let socket_addr = addr
            .parse::<SocketAddr>()
            .map_err(|e| BlockchainError::Network(format!("Invalid address {addr}: {e}")))?;
        let bytes = encode(message, self.wire_format)?;

        let mut stream = TcpStream::connect_timeout(&socket_addr, self.write_timeout)
            .map_err(|e| BlockchainError::Network(format!("Failed to connect to {addr}: {e}")))?;
        stream
            .set_write_timeout(Some(self.write_timeout))
            .map_err(|e| BlockchainError::Network(format!("Failed to set write timeout: {e}")))?;

        stream
            .write_all(&bytes)
            .map_err(|e| BlockchainError::Network(format!("Failed to send data: {e}")))?;
        stream.flush()?;
        // The legacy encoding ends at end of stream
        stream
            .shutdown(Shutdown::Write)
            .map_err(|e| BlockchainError::Network(format!("Failed to close {addr}: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::codec::read_message;
    use crate::storage::SledLedger;
    use crate::wallet::Wallet;
    use std::net::TcpListener;
    use tempfile::tempdir;

    fn config_for(listener: &TcpListener, format: WireFormat) -> Config {
        let addr = listener.local_addr().unwrap();
        Config {
            listen_addr: addr.to_string(),
            listener_port: addr.port(),
            wire_format: format,
            ..Config::default()
        }
    }

    #[test]
    fn test_send_transaction_signs_canonical_payload() {
        let temp_dir = tempdir().unwrap();
        let ledger = Arc::new(SledLedger::create(temp_dir.path().join("ledger")).unwrap());
        let wallet = Wallet::new(3).unwrap();
        ledger.store_wallet(&wallet).unwrap();
        let transaction = ledger
            .add_pending_transaction(
                Transaction::new_transfer(3, wallet.get_address(), "bob", "ETH", 4, 0).unwrap(),
            )
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = BroadcastClient::new(&config_for(&listener, WireFormat::Legacy), ledger);
        client.send_transaction(&transaction).unwrap();

        let (mut stream, _) = listener.accept().unwrap();
        match read_message(&mut stream, 4096).unwrap() {
            Message::TransactionProposal {
                payload,
                signature,
                public_key,
                transaction_id,
            } => {
                assert_eq!(payload, transaction.canonical_payload());
                assert_eq!(transaction_id, transaction.get_id());
                assert!(signature::verify(payload.as_bytes(), &signature, &public_key));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_send_transaction_without_wallet() {
        let temp_dir = tempdir().unwrap();
        let ledger = Arc::new(SledLedger::create(temp_dir.path().join("ledger")).unwrap());
        let transaction = Transaction::new_transfer(9, "a", "b", "BTC", 1, 0).unwrap();

        let client = BroadcastClient::new(&Config::default(), ledger);
        assert!(matches!(
            client.send_transaction(&transaction),
            Err(BlockchainError::Wallet(_))
        ));
    }

    #[test]
    fn test_broadcast_waits_for_threshold() {
        let temp_dir = tempdir().unwrap();
        let ledger = Arc::new(SledLedger::create(temp_dir.path().join("ledger")).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        ledger.register_miner_endpoint(12345, "127.0.0.1").unwrap();
        let client = BroadcastClient::new(&config_for(&listener, WireFormat::Framed), ledger.clone());

        for _ in 0..2 {
            ledger
                .add_pending_transaction(Transaction::new_transfer(1, "a", "b", "BTC", 1, 0).unwrap())
                .unwrap();
        }
        assert_eq!(client.broadcast_tip().unwrap(), 0);

        ledger
            .add_pending_transaction(Transaction::new_transfer(1, "a", "b", "BTC", 1, 0).unwrap())
            .unwrap();
        assert_eq!(client.broadcast_tip().unwrap(), 1);

        let (mut stream, _) = listener.accept().unwrap();
        let tip = ledger.get_latest_block().unwrap();
        assert_eq!(
            read_message(&mut stream, 4096).unwrap(),
            Message::block_proposal(12345, tip)
        );
    }

    #[test]
    fn test_broadcast_skips_unreachable_endpoint() {
        let temp_dir = tempdir().unwrap();
        let ledger = Arc::new(SledLedger::create(temp_dir.path().join("ledger")).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        ledger.register_miner_endpoint(1, "not-an-ip").unwrap();
        ledger.register_miner_endpoint(2, "127.0.0.1").unwrap();
        for _ in 0..3 {
            ledger
                .add_pending_transaction(Transaction::new_transfer(1, "a", "b", "BTC", 1, 0).unwrap())
                .unwrap();
        }

        let client = BroadcastClient::new(&config_for(&listener, WireFormat::Framed), ledger);
        assert_eq!(client.broadcast_tip().unwrap(), 1);
    }
}
