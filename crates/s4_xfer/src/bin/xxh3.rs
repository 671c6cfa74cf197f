//! Content hasher.
//!
//! `xxh3 --stream` copies stdin to stdout unchanged and prints the hex
//! digest on stderr, so it can sit in the middle of a transfer pipeline.
//! Without `--stream` it consumes stdin and prints the digest on stdout.

use anyhow::Result;
use clap::Parser;
use tokio::io::AsyncReadExt;
use xxhash_rust::xxh3::Xxh3;

#[derive(Parser, Debug)]
#[command(name = "xxh3", about = "xxh3_64 of stdin, as 16 hex digits")]
struct Args {
    /// Tee stdin to stdout and print the digest on stderr.
    #[arg(long)]
    stream: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut stdin = tokio::io::stdin();
    if args.stream {
        let mut stdout = tokio::io::stdout();
        let (_, digest) = s4_xfer::copy_and_hash(&mut stdin, &mut stdout).await?;
        eprintln!("{}", digest);
    } else {
        let mut hasher = Xxh3::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = stdin.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        println!("{}", s4_xfer::format_digest(hasher.digest()));
    }
    Ok(())
}
