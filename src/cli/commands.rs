use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "ledger-node")]
pub struct Opt {
    #[arg(
        long = "config",
        global = true,
        help = "TOML configuration file; NODE_ID, NODE_ADDRESS, MINING_ADDRESS, BOOTNODE and DATA_DIR override it"
    )]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "createblockchain", about = "Create a new blockchain")]
    Createblockchain {
        #[arg(help = "The address to send genesis block reward to")]
        address: String,
    },
    #[command(
        name = "getbalance",
        about = "Get the balance of the target address"
    )]
    GetBalance {
        #[arg(help = "The owner address")]
        address: String,
    },
    #[command(name = "send", about = "Send value between addresses")]
    Send {
        #[arg(help = "Source address")]
        from: String,
        #[arg(help = "Destination address")]
        to: String,
        #[arg(help = "Amount to send")]
        amount: u64,
        #[arg(long = "mine", help = "Mine immediately on the same node")]
        mine: bool,
        #[arg(long = "bootnode", help = "Node to send the transaction to")]
        bootnode: Option<String>,
    },
    #[command(name = "printchain", about = "Print all blocks in the blockchain")]
    Printchain,
    #[command(name = "reindexutxo", about = "Rebuild UTXO index set")]
    Reindexutxo,
    #[command(name = "startnode", about = "Start a ledger node")]
    StartNode {
        #[arg(long = "miner", help = "Enable mining mode and send reward to ADDRESS")]
        miner: Option<String>,
        #[arg(long = "bootnode", help = "Bootstrap the chain from this node")]
        bootnode: Option<String>,
    },
}
