use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "settlement-chain")]
pub struct Opt {
    #[arg(long, global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    #[command(
        name = "init",
        about = "Create the ledger with its genesis block and register the configured miners"
    )]
    Init,
    #[command(name = "createwallet", about = "Create a new wallet for a user")]
    Createwallet {
        #[arg(long, help = "The user who owns the wallet")]
        user: u64,
    },
    #[command(name = "getbalance", about = "Print every balance held by a wallet")]
    GetBalance {
        #[arg(help = "The wallet address")]
        address: String,
    },
    #[command(name = "deposit", about = "Credit a wallet with funds")]
    Deposit {
        #[arg(help = "The wallet address")]
        address: String,
        #[arg(help = "Currency code, e.g. BTC")]
        currency: String,
        #[arg(help = "Amount in minor units")]
        amount: u64,
    },
    #[command(
        name = "transfer",
        about = "Record a transfer, send it for verification and broadcast the tip"
    )]
    Transfer {
        #[arg(long, help = "The user whose wallet pays")]
        user: u64,
        #[arg(help = "Destination wallet address")]
        to: String,
        #[arg(help = "Currency code, e.g. BTC")]
        currency: String,
        #[arg(help = "Amount in minor units")]
        amount: u64,
        #[arg(long, default_value_t = 0, help = "Fee earned by the miner endpoint")]
        fee: u64,
    },
    #[command(name = "startnode", about = "Run the listener and the mining workers")]
    StartNode,
    #[command(name = "printchain", about = "Print all blocks in the chain")]
    Printchain,
    #[command(name = "listminers", about = "Print the registered miner endpoints")]
    ListMiners,
}
