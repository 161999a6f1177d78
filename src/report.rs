/*!
 * Guard statistics reports
 *
 * Reports are plain serde structs so the CLI can print them as a table
 * or as JSON.
 */

use crate::guards::GuardSet;
use chrono::{DateTime, Utc};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use rampart_core_resilience::{
    BulkheadState, ChainConfig, CircuitState, GuardChain, MonitoredErrors,
};
use serde::Serialize;
use std::time::Duration;

/// Statistics of every guard in a set
#[derive(Debug, Clone, Serialize)]
pub struct GuardReport {
    pub generated_at: DateTime<Utc>,
    pub guards: Vec<GuardStatus>,
}

/// Statistics of one guard chain
#[derive(Debug, Clone, Serialize)]
pub struct GuardStatus {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bulkhead: Option<BulkheadStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub requests_per_window: u32,
    pub window_secs: f64,
    pub tracked_keys: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkheadStatus {
    pub state: &'static str,
    pub max_concurrent: usize,
    pub current_concurrent: usize,
    pub total_accepted: u64,
    pub total_rejected: u64,
    pub total_completed: u64,
    pub total_failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStatus {
    pub state: &'static str,
    pub failure_count: u32,
    pub half_open_calls_in_flight: u32,
    /// Seconds until an open breaker lets a probe through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_in_secs: Option<f64>,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejected: u64,
}

impl GuardStatus {
    /// Collect the current counters of one chain
    pub fn from_chain(chain: &GuardChain) -> Self {
        let rate_limit = chain.rate_limiter().map(|limiter| RateLimitStatus {
            requests_per_window: limiter.config().requests_per_window,
            window_secs: limiter.config().window_size.as_secs_f64(),
            tracked_keys: limiter.tracked_keys(),
        });

        let bulkhead = chain.bulkhead().map(|bulkhead| {
            let stats = bulkhead.stats();
            BulkheadStatus {
                state: match bulkhead.state() {
                    BulkheadState::Accepting => "accepting",
                    BulkheadState::Rejecting => "rejecting",
                },
                max_concurrent: stats.max_concurrent,
                current_concurrent: stats.current_concurrent,
                total_accepted: stats.total_accepted,
                total_rejected: stats.total_rejected,
                total_completed: stats.total_completed,
                total_failed: stats.total_failed,
            }
        });

        let circuit_breaker = chain.circuit_breaker().map(|breaker| {
            let stats = breaker.stats();
            CircuitBreakerStatus {
                state: stats.state.as_str(),
                failure_count: stats.failure_count,
                half_open_calls_in_flight: stats.half_open_calls_in_flight,
                recovery_in_secs: stats.retry_after.map(|d| d.as_secs_f64()),
                total_successes: stats.total_successes,
                total_failures: stats.total_failures,
                total_rejected: stats.total_rejected,
            }
        });

        Self {
            name: chain.name().to_string(),
            rate_limit,
            bulkhead,
            circuit_breaker,
        }
    }

    /// True while the breaker is failing fast
    pub fn is_tripped(&self) -> bool {
        self.circuit_breaker
            .as_ref()
            .is_some_and(|b| b.state == CircuitState::Open.as_str())
    }
}

impl GuardReport {
    /// Snapshot every chain in the set
    pub fn collect(set: &GuardSet) -> Self {
        Self {
            generated_at: Utc::now(),
            guards: set.iter().map(|(_, chain)| GuardStatus::from_chain(chain)).collect(),
        }
    }

    /// Render as a table, one row per guard
    pub fn to_table(&self) -> Table {
        let mut table = create_table();
        table.set_header(vec![
            "Guard",
            "Rate limit",
            "Bulkhead",
            "Circuit breaker",
        ]);

        for guard in &self.guards {
            let rate = guard.rate_limit.as_ref().map_or_else(dash, |r| {
                format!(
                    "{}/{} · {} keys",
                    r.requests_per_window,
                    format_secs(r.window_secs),
                    r.tracked_keys
                )
            });
            let bulkhead = guard.bulkhead.as_ref().map_or_else(dash, |b| {
                format!(
                    "{} {}/{} · ok {} fail {} rej {}",
                    b.state,
                    b.current_concurrent,
                    b.max_concurrent,
                    b.total_completed,
                    b.total_failed,
                    b.total_rejected
                )
            });
            let breaker = guard.circuit_breaker.as_ref().map_or_else(dash, |c| {
                format!(
                    "{} · failures {} · rej {}",
                    c.state, c.failure_count, c.total_rejected
                )
            });

            let breaker_cell = if guard.is_tripped() {
                Cell::new(breaker).fg(Color::Red)
            } else {
                Cell::new(breaker)
            };
            table.add_row(vec![
                Cell::new(&guard.name).fg(Color::Cyan),
                Cell::new(rate),
                Cell::new(bulkhead),
                breaker_cell,
            ]);
        }

        table
    }
}

/// Describe configured stages, one row per guard
pub fn config_table<'a, I>(guards: I) -> Table
where
    I: IntoIterator<Item = (&'a str, &'a ChainConfig)>,
{
    let mut table = create_table();
    table.set_header(vec!["Guard", "Rate limit", "Bulkhead", "Circuit breaker"]);

    for (name, config) in guards {
        let rate = config.rate_limit.map_or_else(dash, |r| {
            format!(
                "{} per {}",
                r.requests_per_window,
                format_duration(r.window_size)
            )
        });
        let bulkhead = config.bulkhead.map_or_else(dash, |b| {
            format!(
                "{} concurrent, wait {}",
                b.max_concurrent,
                format_duration(b.max_wait)
            )
        });
        let breaker = config.circuit_breaker.as_ref().map_or_else(dash, |c| {
            let monitored = match &c.monitored_errors {
                MonitoredErrors::All => "all errors".to_string(),
                MonitoredErrors::Only(kinds) => {
                    let mut kinds: Vec<_> = kinds.iter().map(String::as_str).collect();
                    kinds.sort_unstable();
                    kinds.join(", ")
                }
            };
            format!(
                "open after {}, recover {}, {} probe(s), on {}",
                c.failure_threshold,
                format_duration(c.recovery_timeout),
                c.half_open_max_calls,
                monitored
            )
        });

        table.add_row(vec![
            Cell::new(name).fg(Color::Cyan),
            Cell::new(rate),
            Cell::new(bulkhead),
            Cell::new(breaker),
        ]);
    }

    table
}

fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn dash() -> String {
    "—".to_string()
}

fn format_secs(secs: f64) -> String {
    format_duration(Duration::from_secs_f64(secs))
}

/// Format a duration as `90s`, `1.5s`, `250ms`, `2m`, `1h`, `1d`
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if d.subsec_nanos() == 0 && secs > 0 {
        match secs {
            s if s % 86_400 == 0 => format!("{}d", s / 86_400),
            s if s % 3_600 == 0 => format!("{}h", s / 3_600),
            s if s % 60 == 0 => format!("{}m", s / 60),
            s => format!("{}s", s),
        }
    } else if secs == 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RampartConfig;
    use rampart_core_resilience::{GuardRegistry, ManualClock};
    use std::sync::Arc;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(86_400)), "1d");
        assert_eq!(format_duration(Duration::from_secs(3_600)), "1h");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::ZERO), "0ms");
    }

    #[test]
    fn test_report_reflects_guard_state() {
        let config = RampartConfig::example();
        let set = GuardSet::from_config(&config, &GuardRegistry::new()).unwrap();

        let orders = set.chain("orders").unwrap();
        orders.circuit_breaker().unwrap().force_open();
        let _ = orders.rate_limiter().unwrap().is_allowed("customer-1");

        let report = GuardReport::collect(&set);
        assert_eq!(report.guards.len(), 2);

        let status = &report.guards[0];
        assert_eq!(status.name, "orders");
        assert!(status.is_tripped());
        assert_eq!(status.rate_limit.as_ref().unwrap().tracked_keys, 1);
        assert_eq!(status.bulkhead.as_ref().unwrap().state, "accepting");
        assert!(status.circuit_breaker.as_ref().unwrap().recovery_in_secs.is_some());

        let search = &report.guards[1];
        assert!(search.bulkhead.is_none());
        assert!(!search.is_tripped());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["guards"][0]["circuit_breaker"]["state"], "open");
        assert!(json["guards"][1].get("bulkhead").is_none());

        let mut table = report.to_table();
        table.set_content_arrangement(ContentArrangement::Disabled);
        let rendered = table.to_string();
        assert!(rendered.contains("orders"));
        assert!(rendered.contains("search"));
    }

    #[test]
    fn test_recovery_countdown_follows_registry_clock() {
        let clock = ManualClock::new();
        let registry = GuardRegistry::with_clock(Arc::new(clock.clone()));
        let set = GuardSet::from_config(&RampartConfig::example(), &registry).unwrap();
        let orders = set.chain("orders").unwrap();
        let breaker = orders.circuit_breaker().unwrap();
        breaker.force_open();

        let timeout = breaker.config().recovery_timeout;
        clock.advance(timeout / 2);

        let status = GuardStatus::from_chain(orders);
        let remaining = status.circuit_breaker.unwrap().recovery_in_secs.unwrap();
        assert_eq!(remaining, (timeout - timeout / 2).as_secs_f64());

        clock.advance(timeout);
        let status = GuardStatus::from_chain(orders);
        let breaker_status = status.circuit_breaker.unwrap();
        assert_eq!(breaker_status.state, "half_open");
        assert!(breaker_status.recovery_in_secs.is_none());
    }

    #[test]
    fn test_config_table_lists_stages() {
        let config = RampartConfig::example();
        let chains: Vec<_> = config
            .guards
            .iter()
            .map(|(name, guard)| (name.clone(), guard.to_chain_config().unwrap()))
            .collect();

        let mut table = config_table(chains.iter().map(|(n, c)| (n.as_str(), c)));
        table.set_content_arrangement(ContentArrangement::Disabled);
        let rendered = table.to_string();
        assert!(rendered.contains("100 per 1m"));
        assert!(rendered.contains("20 per 1s"));
        assert!(rendered.contains("timeout, unavailable"));
    }
}
