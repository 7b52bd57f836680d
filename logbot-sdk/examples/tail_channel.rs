//! Watch a channel from the terminal.
//!
//! Usage:
//!   cargo run --example tail_channel -- --server irc.snoonet.org:6667 \
//!     --nick tailbot --channel "#bottest"
//!
//! Prints every message and action seen in the channel until the server
//! closes the connection.

use anyhow::Result;
use clap::Parser;
use logbot_sdk::client::{self, ConnectConfig};
use logbot_sdk::event::Event;
use logbot_sdk::irc::nick_of;

#[derive(Parser)]
#[command(name = "tail-channel", about = "Print channel traffic to stdout")]
struct Args {
    #[arg(long, default_value = "irc.snoonet.org:6667")]
    server: String,
    #[arg(long, default_value = "tailbot")]
    nick: String,
    #[arg(long, default_value = "#bottest")]
    channel: String,
    #[arg(long)]
    tls: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = ConnectConfig {
        server_addr: args.server.clone(),
        nick: args.nick.clone(),
        user: args.nick.clone(),
        realname: "logbot-sdk tail example".to_string(),
        tls: args.tls,
    };
    let conn = client::establish_connection(&config).await?;
    let (handle, mut events) = client::connect_with_stream(conn, config);

    while let Some(event) = events.recv().await {
        match event {
            Event::Registered { nick } => {
                println!("-- registered as {nick}");
                handle.join(&args.channel)?;
            }
            Event::Joined { channel, nick } => println!("-- {nick} joined {channel}"),
            Event::Message { from, target, text } => println!("{target} <{}> {text}", nick_of(&from)),
            Event::Action { from, target, text } => println!("{target} * {} {text}", nick_of(&from)),
            Event::NickChanged { from, new_nick } => {
                println!("-- {} is now known as {new_nick}", nick_of(&from));
            }
            Event::Disconnected { reason } => {
                println!("-- disconnected: {reason}");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}
