use crate::commands::{Args, CommandError};
use crate::resp;

/// `CONFIG GET param [param ...]` answers with a flat array of name/value
/// pairs. Only the snapshot location parameters are exposed; unknown
/// names are simply left out of the reply.
#[derive(Debug, PartialEq)]
pub struct Config {
    pub params: Vec<String>,
}

impl Config {
    pub fn parse(mut args: Args) -> Result<Config, CommandError> {
        let subcommand = args.next_string()?;
        if !subcommand.eq_ignore_ascii_case("get") {
            return Err(CommandError::Syntax);
        }
        let params = std::iter::from_fn(|| args.try_next_bytes())
            .map(|p| String::from_utf8_lossy(&p).to_lowercase())
            .collect::<Vec<_>>();
        if params.is_empty() {
            return Err(CommandError::WrongArity("config"));
        }
        Ok(Config { params })
    }

    pub fn exec(self, config: &crate::config::Config) -> Vec<u8> {
        let mut pairs: Vec<(&str, String)> = Vec::new();
        for param in &self.params {
            match param.as_str() {
                "dir" => pairs.push(("dir", config.dir.display().to_string())),
                "dbfilename" => pairs.push(("dbfilename", config.dbfilename.clone())),
                _ => {}
            }
        }

        let mut buf = Vec::new();
        resp::append_array(&mut buf, pairs.len() * 2);
        for (name, value) in &pairs {
            resp::append_bulk_str(&mut buf, name);
            resp::append_bulk_str(&mut buf, value);
        }
        buf
    }
}
