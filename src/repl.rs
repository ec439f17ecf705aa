use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};

use codec::Id;
use service::Server;

const HELP: &str = "Commands:
   info
   set <id> <data>
   get <id>
   help";

/// Read commands from stdin until end of input.
pub async fn run(server: &Server) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = match lines.next_line().await? {
            Some(line) => line,
            None => return Ok(()),
        };

        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [] => {}
            ["help"] => println!("{}", HELP),
            ["info"] => info(server).await,
            ["set", id, data @ ..] if !data.is_empty() => match parse_id(id) {
                Some(id) => server.set(id, data.join(" ").into_bytes()).await,
                None => println!("invalid id: {}", id),
            },
            ["get", id] => match parse_id(id) {
                Some(id) => match server.get(&id).await {
                    Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                    None => println!("not found"),
                },
                None => println!("invalid id: {}", id),
            },
            _ => println!("unknown command, try `help`"),
        }
    }
}

fn parse_id(text: &str) -> Option<Id> {
    text.parse().ok()
}

async fn info(server: &Server) {
    println!("  Server: {}", server.node());

    println!("  Nodes:");
    for node in server.known_nodes().await {
        println!("    {}", node);
    }

    println!("  Storage:");
    for (key, value) in server.storage_entries() {
        println!("    {} = {}", key, String::from_utf8_lossy(&value));
    }
}
