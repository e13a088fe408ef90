use anyhow::{Result, bail};
use std::io::{self, BufRead, IsTerminal};
use zeroize::Zeroizing;

/// Access token for the platform API, sent as the `Authorization` header.
///
/// Taken from `--token` / `CF_ACCESS_TOKEN` when given, otherwise from a
/// pipe, otherwise from an interactive prompt.
pub fn read_token(provided: Option<String>) -> Result<Zeroizing<String>> {
    //  Flag or environment variable
    //  CF_ACCESS_TOKEN="bearer ey..." brokerseal upgrade-all csb
    if let Some(token) = provided {
        let token = token.trim().to_string();
        if !token.is_empty() {
            return Ok(Zeroizing::new(token));
        }
    }

    //  stdin (Pipeline)
    //  cf oauth-token | brokerseal upgrade-all csb
    if !io::stdin().is_terminal() {
        let mut buf = Zeroizing::new(String::new());
        io::stdin().lock().read_line(&mut buf)?;
        let token = buf.trim_end();

        if !token.is_empty() {
            return Ok(Zeroizing::new(token.to_string()));
        }
    }

    //  Interactive (TTY)
    if io::stdin().is_terminal() {
        let token = Zeroizing::new(rpassword::prompt_password("Access token: ")?);
        if !token.trim().is_empty() {
            return Ok(Zeroizing::new(token.trim().to_string()));
        }
    }

    bail!("no access token provided; set CF_ACCESS_TOKEN or pass --token")
}
