use clap::{Parser, ValueEnum};

use codec::{Addr, Id, Node};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Config {
    /// UDP port to listen on.
    #[arg(long, short, default_value_t = 7890)]
    pub port: u16,

    /// Node id, decimal or base32.
    ///
    /// A random id is generated when absent.
    #[arg(long)]
    pub id: Option<String>,

    /// Bootstrap peers, as id,host,port triples.
    #[arg(long, short)]
    pub bootstrap: Vec<String>,

    /// Logger verbosity.
    #[arg(long, value_enum, default_value = "warn")]
    pub log_level: LogLevel,
}

impl Config {
    /// Load command line parameters.
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn node_id(&self) -> anyhow::Result<Option<Id>> {
        match &self.id {
            None => Ok(None),
            Some(text) => Ok(Some(
                text.parse()
                    .map_err(|_| anyhow::anyhow!("invalid node id: {}", text))?,
            )),
        }
    }

    /// Parse every `--bootstrap id,host,port` flag.
    pub fn bootstrap_nodes(&self) -> anyhow::Result<Vec<Node>> {
        let mut nodes = Vec::with_capacity(self.bootstrap.len());
        for peer in &self.bootstrap {
            let mut fields = peer.splitn(3, ',');
            let node = match (fields.next(), fields.next(), fields.next()) {
                (Some(id), Some(host), Some(port)) => {
                    let id = id
                        .parse()
                        .map_err(|_| anyhow::anyhow!("invalid bootstrap id: {}", peer))?;
                    let port = port
                        .parse()
                        .map_err(|_| anyhow::anyhow!("invalid bootstrap port: {}", peer))?;
                    Node::new(id, Addr::new(host, port))
                }
                _ => anyhow::bail!("bootstrap peers take the form id,host,port: {}", peer),
            };
            nodes.push(node);
        }

        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_parsing() {
        let config = Config::parse_from([
            "kad-server",
            "--bootstrap",
            "42,127.0.0.1,7001",
            "-b",
            "7,localhost,7002",
        ]);

        let nodes = config.bootstrap_nodes().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, Id::from(42u64));
        assert_eq!(nodes[0].addr, Addr::new("127.0.0.1", 7001));
        assert_eq!(nodes[1].addr.host, "localhost");

        let config = Config::parse_from(["kad-server", "--bootstrap", "nope"]);
        assert!(config.bootstrap_nodes().is_err());
    }

    #[test]
    fn test_node_id_parsing() {
        let config = Config::parse_from(["kad-server", "--id", "1234"]);
        assert_eq!(config.node_id().unwrap(), Some(Id::from(1234u64)));

        let config = Config::parse_from(["kad-server"]);
        assert_eq!(config.node_id().unwrap(), None);
    }
}
