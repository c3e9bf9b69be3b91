use std::{env, io, process};

use escrow_eng::Config;
use escrow_eng::csv::{read_journal, write_wallets};
use escrow_eng::replay::Replay;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .with_writer(io::stderr)
        .init();

    let path = env::args()
        .nth(1)
        .expect("usage: escrow-eng <journal.csv>");

    if !path.ends_with(".csv") {
        warn!(path = %path, "input file seems to not be a csv file");
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            process::exit(2);
        }
    };
    if config.webhook_secret.is_none() {
        warn!("no webhook secret configured, callbacks will be rejected");
    }

    let journal = match read_journal(path.clone()) {
        Ok(journal) => journal,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    let mut replay = Replay::new(config);
    let (entry_sender, mut entry_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for (idx, result) in journal.enumerate() {
            match result {
                Ok(entry) => {
                    if entry_sender.send((idx + 2, entry)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    while let Some((line, entry)) = entry_receiver.recv().await {
        if let Err(e) = replay.apply(entry) {
            warn!("line {line}: {e}");
        }
    }

    let balances = replay.balances();
    let rows = balances
        .iter()
        .map(|(wallet, owner, balance)| (*wallet, owner.as_str(), *balance));
    if let Err(e) = write_wallets(io::stdout().lock(), rows) {
        error!("failed to write balances: {e}");
        process::exit(1);
    }
}
