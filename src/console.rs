//! Line commands accepted by `minerhat run` on stdin.
//!
//! One command per line. Player arguments are UUIDs; amounts are decimal
//! strings in the mined currency.

use crate::contribution::{Amount, PlayerId};
use std::str::FromStr;
use thiserror::Error;

pub const HELP: &str = "\
commands:
  join <uuid>               player joined
  leave <uuid>              player left
  population <n>            override the online count seen by the miner
  check <uuid>              checkout the last 24h of revenue
  revenue <uuid>            realized and pending revenue
  history <uuid>            realized revenue history
  mining <uuid>             wallet and worker name for personal mining
  exchange <uuid> <amount>  exchange realized revenue into the economy
  sync                      synchronise with the pool now
  status                    scheduler and pool status
  reload                    reload config.json
  quit                      stop the miner and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Join(PlayerId),
    Leave(PlayerId),
    Population(u32),
    Check(PlayerId),
    Revenue(PlayerId),
    History(PlayerId),
    Mining(PlayerId),
    Exchange(PlayerId, Amount),
    Sync,
    Status,
    Reload,
    Help,
    Quit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),

    #[error("'{command}' needs a {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("invalid {argument} '{value}'")]
    InvalidArgument { argument: &'static str, value: String },

    #[error("'{0}' takes no further arguments")]
    TrailingArguments(&'static str),
}

struct Args<'a> {
    command: &'static str,
    words: std::str::SplitWhitespace<'a>,
}

impl<'a> Args<'a> {
    fn next(&mut self, argument: &'static str) -> Result<&'a str, ConsoleError> {
        self.words.next().ok_or(ConsoleError::MissingArgument {
            command: self.command,
            argument,
        })
    }

    fn player(&mut self) -> Result<PlayerId, ConsoleError> {
        let value = self.next("player uuid")?;
        PlayerId::parse_str(value).map_err(|_| ConsoleError::InvalidArgument {
            argument: "player uuid",
            value: value.to_string(),
        })
    }

    fn finish<T>(mut self, command: T) -> Result<T, ConsoleError> {
        match self.words.next() {
            Some(_) => Err(ConsoleError::TrailingArguments(self.command)),
            None => Ok(command),
        }
    }
}

impl FromStr for ConsoleCommand {
    type Err = ConsoleError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let head = words.next().ok_or(ConsoleError::Empty)?;
        let command: &'static str = match head.to_ascii_lowercase().as_str() {
            "join" => "join",
            "leave" => "leave",
            "population" => "population",
            "check" | "checkout" => "check",
            "revenue" => "revenue",
            "history" => "history",
            "mining" => "mining",
            "exchange" => "exchange",
            "sync" => "sync",
            "status" => "status",
            "reload" => "reload",
            "help" | "?" => "help",
            "quit" | "exit" | "stop" => "quit",
            _ => return Err(ConsoleError::Unknown(head.to_string())),
        };
        let mut args = Args { command, words };

        let parsed = match command {
            "join" => Self::Join(args.player()?),
            "leave" => Self::Leave(args.player()?),
            "population" => {
                let value = args.next("count")?;
                Self::Population(value.parse().map_err(|_| ConsoleError::InvalidArgument {
                    argument: "count",
                    value: value.to_string(),
                })?)
            }
            "check" => Self::Check(args.player()?),
            "revenue" => Self::Revenue(args.player()?),
            "history" => Self::History(args.player()?),
            "mining" => Self::Mining(args.player()?),
            "exchange" => {
                let player = args.player()?;
                let value = args.next("amount")?;
                let amount = value.parse().map_err(|_| ConsoleError::InvalidArgument {
                    argument: "amount",
                    value: value.to_string(),
                })?;
                Self::Exchange(player, amount)
            }
            "sync" => Self::Sync,
            "status" => Self::Status,
            "reload" => Self::Reload,
            "help" => Self::Help,
            _ => Self::Quit,
        };
        args.finish(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEVE: &str = "67e55044-10b1-426f-9247-bb680e5fe0c8";

    fn steve() -> PlayerId {
        PlayerId::parse_str(STEVE).unwrap()
    }

    #[test]
    fn test_parse_player_commands() {
        assert_eq!(
            format!("join {}", STEVE).parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Join(steve())
        );
        assert_eq!(
            format!("  CHECKOUT   {}  ", STEVE).parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Check(steve())
        );
        assert_eq!(
            format!("exchange {} 0.25", STEVE).parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Exchange(steve(), "0.25".parse().unwrap())
        );
    }

    #[test]
    fn test_parse_bare_commands() {
        assert_eq!("status".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Status);
        assert_eq!("exit".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Quit);
        assert_eq!("population 4".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Population(4));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<ConsoleCommand>(), Err(ConsoleError::Empty));
        assert_eq!(
            "dance".parse::<ConsoleCommand>(),
            Err(ConsoleError::Unknown("dance".into()))
        );
        assert_eq!(
            "join".parse::<ConsoleCommand>(),
            Err(ConsoleError::MissingArgument {
                command: "join",
                argument: "player uuid"
            })
        );
        assert!(matches!(
            "join steve".parse::<ConsoleCommand>(),
            Err(ConsoleError::InvalidArgument { argument: "player uuid", .. })
        ));
        assert!(matches!(
            format!("exchange {} lots", STEVE).parse::<ConsoleCommand>(),
            Err(ConsoleError::InvalidArgument { argument: "amount", .. })
        ));
        assert!(matches!(
            "population -1".parse::<ConsoleCommand>(),
            Err(ConsoleError::InvalidArgument { argument: "count", .. })
        ));
        assert_eq!(
            "status now".parse::<ConsoleCommand>(),
            Err(ConsoleError::TrailingArguments("status"))
        );
    }
}
