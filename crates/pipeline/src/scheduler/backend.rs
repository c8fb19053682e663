use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

const DEFAULT_PORT: u16 = 80;

/// A remote annotation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Backend {
    pub protocol: String,
    pub host: String,
    pub port: u16,
}

impl Backend {
    pub fn new(protocol: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
        }
    }

    pub fn url(&self) -> String {
        self.to_string()
    }

    /// Parse a list such as `"localhost:9000, https://nlp.example:443"`.
    pub fn parse_list<S: AsRef<str>>(list: &[S]) -> Result<Vec<Self>, PipelineError> {
        list.iter()
            .map(|s| s.as_ref().trim())
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

/// `[(http|https)://]host[:port]`, protocol defaulting to `http` and port to 80.
impl FromStr for Backend {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (protocol, rest) = match s.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => ("http".to_string(), s),
        };
        if protocol != "http" && protocol != "https" {
            return Err(PipelineError::Config(format!(
                "unsupported backend protocol '{protocol}' in '{s}'"
            )));
        }

        let rest = rest.trim_end_matches('/');
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    PipelineError::Config(format!("invalid backend port '{port}' in '{s}'"))
                })?;
                (host, port)
            }
            None => (rest, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(PipelineError::Config(format!("backend '{s}' has no host")));
        }

        Ok(Self::new(protocol, host, port))
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}
