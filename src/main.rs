// This is my main entry point for the settlement node CLI
// I'm importing the ledger, the listener and the outbound client I built
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use settlement_chain::{
    BroadcastClient, Command, Config, LedgerGateway, Opt, Server, SledLedger, Transaction, Wallet,
};
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// How often I check the ledger while waiting on the in-process listener
const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn main() {
    // I initialize logging so I can see what's happening on the node
    // Info is the default, RUST_LOG still wins when it is set
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();

    // If something goes wrong, I log the error and exit with code 1
    if let Err(e) = run_command(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::resolve(opt.config.as_deref())?;

    match opt.command {
        // When I set up a node, the chain starts at genesis and the miner registry is provisioned
        Command::Init => {
            let ledger = SledLedger::create(&config.db_path)?;
            register_miners(&ledger, &config)?;
            ledger.flush()?;
            let tip = ledger.get_latest_block()?;
            println!(
                "Done! Ledger at {}, chain tip is block {}",
                ledger.get_db_path().display(),
                tip.get_height()
            );
        }
        // Every user gets exactly one wallet
        Command::Createwallet { user } => {
            let ledger = SledLedger::open(&config.db_path)?;
            if let Some(existing) = ledger.find_wallet_by_user(user)? {
                return Err(format!(
                    "User {user} already owns wallet {}",
                    existing.get_address()
                )
                .into());
            }
            let wallet = Wallet::new(user)?;
            ledger.store_wallet(&wallet)?;
            ledger.flush()?;
            println!("Your new address: {}", wallet.get_address())
        }
        Command::GetBalance { address } => {
            let ledger = SledLedger::open(&config.db_path)?;
            let wallet = ledger
                .find_wallet_by_address(&address)?
                .ok_or_else(|| format!("Unknown wallet: {address}"))?;
            let mut balances: Vec<_> = wallet.get_balances().iter().collect();
            balances.sort();
            println!("Balances of {address}:");
            for (currency, amount) in balances {
                println!("  {currency}: {amount}");
            }
        }
        Command::Deposit {
            address,
            currency,
            amount,
        } => {
            let ledger = SledLedger::open(&config.db_path)?;
            let wallet = ledger.deposit(&address, &currency, amount)?;
            ledger.flush()?;
            println!(
                "Balance of {address}: {} {currency}",
                wallet.get_balance(&currency)
            );
        }
        // When the trading side moves funds, I record it, send it for verification
        // and hand the tip to the miners once enough transfers are waiting
        Command::Transfer {
            user,
            to,
            currency,
            amount,
            fee,
        } => {
            let ledger = SledLedger::open(&config.db_path)?;
            let sender = ledger
                .find_wallet_by_user(user)?
                .ok_or_else(|| format!("User {user} has no wallet"))?;
            let transaction = Transaction::new_transfer(
                user,
                sender.get_address(),
                &to,
                &currency,
                amount,
                fee,
            )?;
            let transaction = ledger.add_pending_transaction(transaction)?;
            println!("Recorded transaction {}", transaction.get_id());

            // Sled locks its database per process, so I host the listener here
            let ledger = Arc::new(ledger);
            let server = Arc::new(Server::bind(&config, ledger.clone(), ledger.clone())?);
            let listener = Arc::clone(&server);
            thread::spawn(move || {
                if let Err(e) = listener.run() {
                    error!("Server error: {e}");
                }
            });

            let client = BroadcastClient::new(&config, ledger.clone());
            match client.send_transaction(&transaction) {
                Ok(()) => {
                    let id = transaction.get_id();
                    let verified = wait_for(config.write_timeout(), || {
                        Ok(ledger.get_transaction(id)?.is_some_and(|tx| tx.is_valid()))
                    })?;
                    if !verified {
                        warn!("Transaction {id} was not verified in time");
                    }
                }
                Err(e) => warn!("Failed to send transaction {}: {e}", transaction.get_id()),
            }

            let height = ledger.get_latest_block()?.get_height();
            let sent = client.broadcast_tip()?;
            if sent > 0 {
                info!("Waiting for block {}", height.saturating_add(1));
                let mined = wait_for(config.read_timeout(), || {
                    Ok(ledger.get_latest_block()?.get_height() > height)
                })?;
                if mined {
                    println!("Block {} settled", height.saturating_add(1));
                } else {
                    warn!("No block was accepted before the read timeout");
                }
            } else {
                println!("Transaction is pending until more transfers arrive");
            }

            server.shutdown();
            ledger.flush()?;
        }
        Command::StartNode => {
            let ledger = SledLedger::open(&config.db_path)?;
            register_miners(&ledger, &config)?;
            let ledger = Arc::new(ledger);
            let server = Server::bind(&config, ledger.clone(), ledger)?;
            server.run()?
        }
        // I print the whole chain oldest first, which is handy for debugging
        Command::Printchain => {
            let ledger = SledLedger::open(&config.db_path)?;
            for block in ledger.blocks()? {
                println!("Block {}: {}", block.get_height(), block.get_id());
                println!("Previous hash: {}", block.get_previous_hash());
                println!("Nonce: {}", block.get_nonce());
                println!("Timestamp: {}", block.get_timestamp());
                for tx in block.get_transactions() {
                    println!(
                        "- Transaction {}: {} {} from {} to {} (fee {}, valid {})",
                        tx.get_id(),
                        tx.get_amount(),
                        tx.get_currency(),
                        tx.get_from(),
                        tx.get_to(),
                        tx.get_fee(),
                        tx.is_valid()
                    );
                }
                println!()
            }
        }
        Command::ListMiners => {
            let ledger = SledLedger::open(&config.db_path)?;
            for endpoint in ledger.list_miner_endpoints()? {
                println!(
                    "{} at {} (balance {})",
                    endpoint.get_id(),
                    endpoint.get_address(),
                    endpoint.get_balance()
                );
            }
        }
    }
    Ok(())
}

fn register_miners(ledger: &SledLedger, config: &Config) -> settlement_chain::Result<()> {
    for miner in &config.miners {
        ledger.register_miner_endpoint(miner.id, &miner.address)?;
    }
    Ok(())
}

// Poll `done` until it holds or `timeout` passes
fn wait_for<F>(timeout: Duration, mut done: F) -> settlement_chain::Result<bool>
where
    F: FnMut() -> settlement_chain::Result<bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if done()? {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
