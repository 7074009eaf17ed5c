//! Standalone signing utility.
//!
//! Reads an exported transaction envelope, signs it with the named wallet's
//! keys and writes `signed.txn` next to the input file. Exit code 0 on
//! success, nonzero on any validation or authentication failure.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::{env, fs};

use bitstore::{Config, Result, Wallet};

fn main() -> ExitCode {
    bitstore::utils::tracing::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        eprintln!("usage: bitstore-sign <wallet_name> <password> <tx_file>");
        return ExitCode::FAILURE;
    }

    match run(&args[1], &args[2], Path::new(&args[3])) {
        Ok(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(wallet_name: &str, password: &str, tx_file: &Path) -> Result<PathBuf> {
    let config = Config::default();
    let wallet = Wallet::open(&config, wallet_name, password, true)?;

    let text = fs::read_to_string(tx_file)?;
    let mut builder = wallet.import_transaction(&text)?;
    wallet.sign_transaction(&mut builder, password)?;

    let out = tx_file.with_file_name("signed.txn");
    fs::write(&out, wallet.export_transaction(&builder)?)?;
    Ok(out)
}
