use anyhow::{Context, Result};
use std::io::{self, BufRead};

use lp_tracker::coder::{decode_instruction, Instruction};

fn describe(ix: &Instruction) -> String {
    match ix {
        Instruction::Initialize2 {
            nonce,
            open_time,
            init_pc_amount,
            init_coin_amount,
        } => format!(
            "Initialize2 nonce={nonce} open_time={open_time} pc={init_pc_amount} coin={init_coin_amount}"
        ),
        Instruction::Withdraw { amount } => format!("Withdraw amount={amount}"),
        Instruction::SwapBaseIn {
            amount_in,
            minimum_amount_out,
        } => format!("SwapBaseIn amount_in={amount_in} min_out={minimum_amount_out}"),
        Instruction::SwapBaseOut {
            max_amount_in,
            amount_out,
        } => format!("SwapBaseOut max_in={max_amount_in} amount_out={amount_out}"),
        other => format!("{other:?}"),
    }
}

/// Decodes base58 AMM instruction data, one per line, from a file argument or stdin.
fn main() -> Result<()> {
    let lines: Vec<String> = match std::env::args().nth(1) {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("read {path}"))?
            .lines()
            .map(str::to_string)
            .collect(),
        None => io::stdin().lock().lines().collect::<io::Result<_>>()?,
    };

    for line in lines {
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }
        let data = match bs58::decode(raw).into_vec() {
            Ok(data) => data,
            Err(e) => {
                eprintln!("{raw}: ERROR not base58 ({e})");
                continue;
            }
        };
        match decode_instruction(&data) {
            Ok(ix) => println!("{raw}: {}", describe(&ix)),
            Err(e) => println!("{raw}: {e}"),
        }
    }
    Ok(())
}
