use std::{net::SocketAddr, str::FromStr};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub max_connections: u32,
    /// Buffer size of each room/duo broadcast channel.
    pub topic_capacity: usize,
    /// Default search radius for candidates; `None` is unlimited.
    pub candidate_radius_km: Option<f64>,
    pub max_message_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://duomatch.db".to_owned(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 16,
            topic_capacity: 256,
            candidate_radius_km: None,
            max_message_len: 4000,
        }
    }
}

impl Config {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> anyhow::Result<Config> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let defaults = Config::default();

        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;

        Ok(Config {
            database_url,
            bind_addr: parse_or(&lookup, "BIND_ADDR", defaults.bind_addr)?,
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", defaults.max_connections)?,
            topic_capacity: parse_or(&lookup, "TOPIC_CAPACITY", defaults.topic_capacity)?,
            candidate_radius_km: match lookup("CANDIDATE_RADIUS_KM") {
                Some(raw) => Some(parse_radius(&raw)?),
                None => defaults.candidate_radius_km,
            },
            max_message_len: parse_or(&lookup, "MAX_MESSAGE_LEN", defaults.max_message_len)?,
        })
    }
}

fn parse_radius(raw: &str) -> anyhow::Result<f64> {
    let radius: f64 = parse_value("CANDIDATE_RADIUS_KM", raw)?;
    if !radius.is_finite() || radius < 0.0 {
        anyhow::bail!("CANDIDATE_RADIUS_KM={raw:?} must be a non-negative number");
    }
    Ok(radius)
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{key}={raw:?} is malformed"))
}
