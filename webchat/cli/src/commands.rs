//! Input line parsing
//!
//! Lines starting with `/` are commands; anything else is sent to the bot.

/// What a line of input asks for
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Send text to the bot
    Send(String),
    /// Pick a quick reply (0-based)
    Reply(usize),
    /// Show the overlay
    Open,
    /// Hide the overlay
    Close,
    /// Toggle expanded mode
    Expand,
    /// Clear the history
    Reset,
    /// List commands
    Help,
    /// Leave
    Quit,
    /// Blank line
    Nothing,
}

/// Help text for `/help`
pub const HELP: &str = "\
Commands:
  /reply N   pick quick reply N
  /open      show the chat
  /close     hide the chat
  /expand    toggle expanded mode
  /reset     clear the conversation
  /help      show this help
  /quit      leave";

impl Command {
    /// Parse one input line
    ///
    /// # Errors
    ///
    /// Returns a message for unknown commands and bad `/reply` arguments.
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Self::Nothing);
        }

        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Self::Send(line.to_string()));
        };

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default();
        match name {
            "quit" | "exit" | "q" => Ok(Self::Quit),
            "reset" => Ok(Self::Reset),
            "expand" => Ok(Self::Expand),
            "open" => Ok(Self::Open),
            "close" => Ok(Self::Close),
            "help" | "?" => Ok(Self::Help),
            "reply" => parts
                .next()
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|n| *n >= 1)
                .map(|n| Self::Reply(n - 1))
                .ok_or_else(|| "usage: /reply N (N starts at 1)".to_string()),
            other => Err(format!("unknown command '/{other}', try /help")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_text_is_sent() {
        assert_eq!(
            Command::parse("  hello there "),
            Ok(Command::Send("hello there".to_string()))
        );
        assert_eq!(Command::parse("   "), Ok(Command::Nothing));
    }

    #[test]
    fn test_commands() {
        assert_eq!(Command::parse("/quit"), Ok(Command::Quit));
        assert_eq!(Command::parse("/reset"), Ok(Command::Reset));
        assert_eq!(Command::parse("/expand"), Ok(Command::Expand));
        assert_eq!(Command::parse("/open"), Ok(Command::Open));
        assert_eq!(Command::parse("/close"), Ok(Command::Close));
        assert_eq!(Command::parse("/help"), Ok(Command::Help));
    }

    #[test]
    fn test_reply_is_one_based() {
        assert_eq!(Command::parse("/reply 1"), Ok(Command::Reply(0)));
        assert_eq!(Command::parse("/reply 3"), Ok(Command::Reply(2)));
        assert!(Command::parse("/reply 0").is_err());
        assert!(Command::parse("/reply").is_err());
        assert!(Command::parse("/reply two").is_err());
    }

    #[test]
    fn test_unknown_command() {
        assert!(Command::parse("/dance").is_err());
    }
}
