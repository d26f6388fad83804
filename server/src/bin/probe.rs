//! Queries the master servers once and prints what they report.

use clap::Parser;
use log::info;
use status_server::config::QueryArgs;
use status_server::render::format_connections;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about = "One-shot master server status query")]
struct Args {
    /// Print the aggregated status as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    query: QueryArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let pipeline = args.query.pipeline()?;

    info!("Querying {} master servers", args.query.endpoints.len());
    let started = Instant::now();
    let status = pipeline.run().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    for group in &status.groups {
        println!("{} {}", group.region.emoji(), group.region);
        for server in &group.servers {
            println!(
                "  {:<20} {:<15} {:>7} players",
                server.name,
                server.ip_address,
                format_connections(server.number_of_connections)
            );
        }
    }
    println!(
        "{} servers, answered in {:?}",
        status.server_count(),
        started.elapsed()
    );

    Ok(())
}
