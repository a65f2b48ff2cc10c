use anyhow::Context;
use clap::Parser;
use menu::{History, MENU, MenuChoice};
use tonic::codec::CompressionEncoding;

mod calls;
mod menu;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct CliArgs {
    /// Address of the farming service.
    #[arg(long, env = "FARM_SERVER_ADDR", default_value = "http://127.0.0.1:50051")]
    server_addr: String,

    /// Compress requests and accept compressed responses.
    #[arg(long, env = "FARM_COMPRESSION")]
    compression: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    let mut client = calls::Client::connect(args.server_addr.clone())
        .await
        .with_context(|| format!("failed to connect to {}", args.server_addr))?;
    if args.compression {
        client = client
            .send_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Zstd);
    }

    let mut prompt = calls::Prompt::new();
    let mut history = History::default();

    loop {
        let Some(line) = prompt.ask(MENU).await? else {
            break;
        };
        let choice = match line.parse::<MenuChoice>() {
            Ok(choice) => choice,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        let outcome = match choice {
            MenuChoice::Fertilizer => calls::fertilizer(&mut client, &mut prompt, &mut history).await,
            MenuChoice::Temperature => calls::temperature(&mut client, &mut prompt, &mut history).await,
            MenuChoice::AverageMoisture => {
                calls::average_moisture(&mut client, &mut prompt, &mut history).await
            }
            MenuChoice::OptimalWatering => {
                calls::optimal_watering(&mut client, &mut prompt, &mut history).await
            }
            MenuChoice::History => {
                if history.is_empty() {
                    println!("No results yet.");
                } else {
                    println!("{} result(s):\n{}", history.len(), history.table());
                }
                Ok(())
            }
            MenuChoice::Exit => break,
        };

        // A failed call is reported and the menu comes back.
        if let Err(e) = outcome {
            eprintln!("Error: {e:#}");
        }
    }

    println!("Exiting application.");
    Ok(())
}
