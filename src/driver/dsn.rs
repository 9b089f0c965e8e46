//! Connection string parsing.
//!
//! Connection strings are `KEY=VALUE` pairs separated by `;`, e.g.
//! `DRIVER=postgres;UID=app;PORT=5432;DATABASE=shop;SERVER=db;TCPIP=1;PWD=secret`.
//! A value containing `;` can be wrapped in braces: `PWD={a;b}`.
//! Keys are case-insensitive.

use crate::error::{DriverError, STATE_DRIVER_NOT_FOUND, STATE_GENERAL};
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{take_until, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{all_consuming, opt},
    multi::many0,
    sequence::{delimited, preceded, separated_pair, terminated},
};
use url::Url;

/// Parsed connection string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    pairs: Vec<(String, String)>,
}

impl ConnectionParams {
    /// Parse a `KEY=VALUE;` string.
    pub fn parse(input: &str) -> Result<Self, DriverError> {
        let (_, pairs) = all_consuming(pairs)(input).map_err(|e| {
            DriverError::new(STATE_GENERAL, format!("Malformed connection string: {}", e))
        })?;

        Ok(Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.trim().to_ascii_uppercase(), v.to_string()))
                .collect(),
        })
    }

    /// Value of `key`, last occurrence wins.
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_uppercase();
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Non-empty value of `key`.
    fn field(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Turn the parameters into a database URL understood by sqlx.
    pub fn to_url(&self) -> Result<String, DriverError> {
        let driver = self.field("DRIVER").ok_or_else(|| {
            DriverError::new(STATE_DRIVER_NOT_FOUND, "Connection string has no DRIVER")
        })?;
        let driver = driver.trim_matches(|c| c == '{' || c == '}').to_ascii_lowercase();

        let scheme = if driver.contains("postgres") {
            "postgres"
        } else if driver.contains("mysql") || driver.contains("mariadb") {
            "mysql"
        } else if driver.contains("sqlite") {
            "sqlite"
        } else {
            return Err(DriverError::new(
                STATE_DRIVER_NOT_FOUND,
                format!("Unsupported driver `{}`", driver),
            ));
        };

        if scheme == "sqlite" {
            let database = self.field("DATABASE").unwrap_or(":memory:");
            if database == ":memory:" {
                return Ok("sqlite::memory:".to_string());
            }
            return Ok(format!("sqlite://{}", database));
        }

        let host = self.field("SERVER").unwrap_or("localhost");
        let mut url = Url::parse(&format!("{}://{}", scheme, host)).map_err(|e| {
            DriverError::new(STATE_GENERAL, format!("Invalid server `{}`: {}", host, e))
        })?;

        let invalid = |what: &str| DriverError::new(STATE_GENERAL, format!("Invalid {}", what));

        if let Some(user) = self.field("UID") {
            url.set_username(user).map_err(|_| invalid("user"))?;
        }
        if let Some(password) = self.get("PWD").filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|_| invalid("password"))?;
        }
        if let Some(port) = self.field("PORT") {
            let port: u16 = port.parse().map_err(|_| invalid("port"))?;
            url.set_port(Some(port)).map_err(|_| invalid("port"))?;
        }
        if let Some(database) = self.field("DATABASE") {
            url.set_path(database);
        }

        Ok(url.to_string())
    }
}

/// Resolve a DSN to a URL. A DSN that already is a URL is passed through.
pub fn to_url(dsn: &str) -> Result<String, DriverError> {
    if dsn.contains("://") || dsn.starts_with("sqlite:") {
        return Ok(dsn.to_string());
    }
    ConnectionParams::parse(dsn)?.to_url()
}

fn key(input: &str) -> IResult<&str, &str> {
    preceded(multispace0, take_while1(|c: char| c != '=' && c != ';'))(input)
}

fn braced(input: &str) -> IResult<&str, &str> {
    delimited(char('{'), take_until("}"), char('}'))(input)
}

fn plain(input: &str) -> IResult<&str, &str> {
    take_while(|c: char| c != ';')(input)
}

fn pair(input: &str) -> IResult<&str, (&str, &str)> {
    terminated(
        separated_pair(key, char('='), alt((braced, plain))),
        opt(char(';')),
    )(input)
}

fn pairs(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
    terminated(many0(pair), multispace0)(input)
}
