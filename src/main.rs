use clap::Parser;
use ledger_node::{
    send_tx, Blockchain, Command, Config, OwnerKeyAuthorizer, Opt, Server, Transaction, UTXOSet,
};
use log::{error, info, LevelFilter};
use std::process;

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(opt.config.as_deref())?;

    match opt.command {
        Command::Createblockchain { address } => {
            let blockchain = Blockchain::create_blockchain_with_path(&address, config.db_path())?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            println!("Done!");
        }
        Command::GetBalance { address } => {
            let blockchain = Blockchain::new_blockchain_with_path(config.db_path())?;
            let utxo_set = UTXOSet::new(blockchain);
            let balance = utxo_set.get_balance(&address)?;
            println!("Balance of {address}: {balance}");
        }
        Command::Send {
            from,
            to,
            amount,
            mine,
            bootnode,
        } => {
            let blockchain = Blockchain::new_blockchain_with_path(config.db_path())?;
            let utxo_set = UTXOSet::new(blockchain.clone());
            let transaction =
                Transaction::new_utxo_transaction(&from, &to, amount, &utxo_set, &OwnerKeyAuthorizer)?;

            if mine {
                let coinbase_tx = Transaction::new_coinbase_tx(&from, "")?;
                let block = blockchain.mine_block(&[transaction, coinbase_tx])?;
                utxo_set.update(&block)?;
                info!("Mined block {}", block.hash_hex());
            } else {
                let target = match bootnode.or_else(|| config.bootnode.clone()) {
                    Some(addr) => addr,
                    None => config
                        .known_nodes
                        .first()
                        .cloned()
                        .ok_or("No node to send the transaction to")?,
                };
                send_tx(&config, &target, &transaction)?;
                info!("Sent transaction {} to {target}", transaction.id_hex());
            }
            println!("Success!")
        }
        Command::Printchain => {
            let blockchain = Blockchain::new_blockchain_with_path(config.db_path())?;
            for block in blockchain.iterator()? {
                let block = block?;
                println!("Prev block hash: {}", hex(block.get_prev_hash()));
                println!("Cur block hash: {}", block.hash_hex());
                println!("Nonce: {}", block.get_nonce());

                for tx in block.get_transactions() {
                    println!("- Transaction txid_hex: {}", tx.id_hex());
                    if !tx.is_coinbase() {
                        for input in tx.get_vin() {
                            println!(
                                "-- Input txid = {}, vout = {}",
                                hex(input.get_txid()),
                                input.get_vout(),
                            )
                        }
                    }
                    for output in tx.get_vout() {
                        println!(
                            "-- Output value = {}, to = {}",
                            output.get_value(),
                            output.get_pub_key(),
                        )
                    }
                }
                println!()
            }
        }
        Command::Reindexutxo => {
            let blockchain = Blockchain::new_blockchain_with_path(config.db_path())?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
        Command::StartNode { miner, bootnode } => {
            let config = config.with_miner(miner).with_bootnode(bootnode);
            if let Some(addr) = &config.miner_address {
                println!("Mining is on. Address to receive rewards: {addr}");
            }
            Server::start(config)?
        }
    }
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    data_encoding::HEXLOWER.encode(bytes)
}
