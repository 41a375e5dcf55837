//! Command handlers
//!
//! One function per table entry. Arity is checked before a handler runs,
//! so positional arguments up to the declared minimum are always present.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::engine::Engine;
use crate::error::{Result, TideError};
use crate::protocol::{ParsedCommand, Reply};
use crate::store::{now_ms, IdRequest, StreamEntry, StreamId, Value, ValueKind, WakeReason};
use super::ExecContext;

// =============================================================================
// Connection
// =============================================================================

pub(super) fn handle_ping(_engine: &Engine, command: &ParsedCommand, _ctx: &ExecContext) -> Result<Reply> {
    Ok(match command.arg(0) {
        Some(message) => Reply::bulk_str(message),
        None => Reply::simple("PONG"),
    })
}

pub(super) fn handle_echo(_engine: &Engine, command: &ParsedCommand, _ctx: &ExecContext) -> Result<Reply> {
    Ok(Reply::bulk_str(&command.args[0]))
}

// =============================================================================
// Keyspace
// =============================================================================

pub(super) fn handle_set(engine: &Engine, command: &ParsedCommand, _ctx: &ExecContext) -> Result<Reply> {
    let key = &command.args[0];
    let value = Value::from_input(&command.args[1]);
    let expires_at_ms = parse_set_expiry(&command.args[2..])?;

    engine.store().set(key.clone(), value, expires_at_ms);
    Ok(Reply::ok())
}

/// `[PX ms | EX secs]` to an absolute deadline (0 when absent)
fn parse_set_expiry(options: &[String]) -> Result<u64> {
    let mut expires_at_ms = 0;
    let mut rest = options;

    while let Some((option, tail)) = rest.split_first() {
        let unit_ms: u64 = match option.to_ascii_uppercase().as_str() {
            "PX" => 1,
            "EX" => 1000,
            _ => return Err(TideError::Syntax(format!("unsupported SET option '{}'", option))),
        };
        let (amount, tail) = tail
            .split_first()
            .ok_or_else(|| TideError::Syntax(format!("{} requires a value", option)))?;
        let amount = parse_u64(amount)?;
        if amount == 0 {
            return Err(TideError::Syntax("invalid expire time in 'set' command".to_string()));
        }
        expires_at_ms = now_ms().saturating_add(amount.saturating_mul(unit_ms));
        rest = tail;
    }

    Ok(expires_at_ms)
}

pub(super) fn handle_get(engine: &Engine, command: &ParsedCommand, _ctx: &ExecContext) -> Result<Reply> {
    let key = &command.args[0];
    match engine.store().get(key) {
        Some(Value::String(text)) => Ok(Reply::bulk_str(&text)),
        Some(Value::Integer(number)) => Ok(Reply::bulk_str(&number.to_string())),
        Some(Value::Stream(_)) => Err(TideError::WrongType),
        None => Ok(engine
            .snapshot()
            .lookup(key, now_ms())?
            .map_or(Reply::Null, |entry| Reply::bulk_str(&entry.value))),
    }
}

pub(super) fn handle_incr(engine: &Engine, command: &ParsedCommand, _ctx: &ExecContext) -> Result<Reply> {
    engine.store().incr(&command.args[0]).map(Reply::Integer)
}

pub(super) fn handle_type(engine: &Engine, command: &ParsedCommand, _ctx: &ExecContext) -> Result<Reply> {
    let key = &command.args[0];
    let name = match engine.store().kind(key) {
        Some(kind) => kind.type_name(),
        None if engine.snapshot().lookup(key, now_ms())?.is_some() => ValueKind::String.type_name(),
        None => "none",
    };
    Ok(Reply::simple(name))
}

pub(super) fn handle_keys(engine: &Engine, command: &ParsedCommand, _ctx: &ExecContext) -> Result<Reply> {
    let pattern = &command.args[0];

    let mut keys: BTreeSet<String> = engine.store().keys().into_iter().collect();
    keys.extend(engine.snapshot().keys(now_ms())?);

    Ok(Reply::bulk_array(
        keys.into_iter().filter(|key| glob_match(pattern, key)),
    ))
}

/// Glob matching with `*` (any run), `?` (any one character) and `\`
/// escapes
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // position after the last `*` and the text position it is matched up to
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                p += 1;
                backtrack = Some((p, t));
                continue;
            }
            Some('?') => {
                p += 1;
                t += 1;
                continue;
            }
            Some('\\') if p + 1 < pattern.len() && pattern[p + 1] == text[t] => {
                p += 2;
                t += 1;
                continue;
            }
            Some(&c) if c != '\\' && c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }

        match backtrack {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                backtrack = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

// =============================================================================
// Server
// =============================================================================

pub(super) fn handle_info(engine: &Engine, command: &ParsedCommand, _ctx: &ExecContext) -> Result<Reply> {
    let section = command.arg(0).map(str::to_ascii_lowercase);
    match section.as_deref() {
        None | Some("replication") | Some("all") | Some("default") | Some("everything") => {
            let mut lines = vec!["# Replication".to_string()];
            lines.extend(
                engine
                    .role_state()
                    .info_fields()
                    .into_iter()
                    .map(|(name, value)| format!("{}:{}", name, value)),
            );
            Ok(Reply::bulk_str(&lines.join("\r\n")))
        }
        Some(_) => Ok(Reply::bulk_str("")),
    }
}

pub(super) fn handle_config(engine: &Engine, command: &ParsedCommand, _ctx: &ExecContext) -> Result<Reply> {
    let subcommand = &command.args[0];
    if !subcommand.eq_ignore_ascii_case("GET") {
        return Err(TideError::Syntax(format!(
            "unsupported CONFIG subcommand '{}'",
            subcommand
        )));
    }

    let config = engine.config();
    let mut pairs = Vec::new();
    for parameter in &command.args[1..] {
        let value = match parameter.to_ascii_lowercase().as_str() {
            "dir" => config.snapshot_dir.display().to_string(),
            "dbfilename" => config.snapshot_filename.clone(),
            _ => continue,
        };
        pairs.push(parameter.to_ascii_lowercase());
        pairs.push(value);
    }
    Ok(Reply::bulk_array(pairs))
}

// =============================================================================
// Replication
// =============================================================================

pub(super) fn handle_wait(engine: &Engine, command: &ParsedCommand, ctx: &ExecContext) -> Result<Reply> {
    let num_replicas = parse_usize(&command.args[0])?;
    let timeout = Duration::from_millis(parse_u64(&command.args[1])?);

    let (Some(master), Some(index)) = (engine.as_master(), ctx.history_index) else {
        return Ok(Reply::Integer(0));
    };

    let acked = master.wait_for_acks(index, num_replicas, timeout);
    Ok(Reply::Integer(i64::try_from(acked).unwrap_or(i64::MAX)))
}

// =============================================================================
// Streams
// =============================================================================

pub(super) fn handle_xadd(engine: &Engine, command: &ParsedCommand, _ctx: &ExecContext) -> Result<Reply> {
    let key = &command.args[0];
    let request: IdRequest = command.args[1].parse()?;

    let pairs = &command.args[2..];
    if pairs.len() % 2 != 0 {
        return Err(TideError::WrongArity("xadd".to_string()));
    }
    let fields = pairs
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();

    let id = engine.store().xadd(key, request, fields)?;
    let woken = engine.blocking().notify(key);
    if woken > 0 {
        tracing::trace!("XADD {} woke {} blocked readers", key, woken);
    }
    Ok(Reply::bulk_str(&id.to_string()))
}

pub(super) fn handle_xrange(engine: &Engine, command: &ParsedCommand, _ctx: &ExecContext) -> Result<Reply> {
    let key = &command.args[0];
    let start = StreamId::parse_range_start(&command.args[1])?;
    let end = StreamId::parse_range_end(&command.args[2])?;

    let count = match &command.args[3..] {
        [] => None,
        [option, count] if option.eq_ignore_ascii_case("COUNT") => Some(parse_usize(count)?),
        _ => return Err(TideError::Syntax("expected COUNT <n>".to_string())),
    };

    let entries = engine.store().xrange(key, start, end, count)?;
    Ok(Reply::Array(entries.iter().map(StreamEntry::to_reply).collect()))
}

/// Parsed `XREAD [COUNT n] [BLOCK ms] STREAMS key... id...`
#[derive(Debug, PartialEq, Eq)]
struct XReadRequest {
    count: Option<usize>,
    block_ms: Option<u64>,
    keys: Vec<String>,
    ids: Vec<String>,
}

fn parse_xread(args: &[String]) -> Result<XReadRequest> {
    let mut count = None;
    let mut block_ms = None;
    let mut rest = args;

    loop {
        match rest {
            [option, value, tail @ ..] if option.eq_ignore_ascii_case("COUNT") => {
                count = Some(parse_usize(value)?);
                rest = tail;
            }
            [option, value, tail @ ..] if option.eq_ignore_ascii_case("BLOCK") => {
                block_ms = Some(parse_u64(value)?);
                rest = tail;
            }
            [option, tail @ ..] if option.eq_ignore_ascii_case("STREAMS") => {
                rest = tail;
                break;
            }
            _ => return Err(TideError::Syntax("expected STREAMS before keys".to_string())),
        }
    }

    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(TideError::Syntax(
            "unbalanced XREAD list of streams: for each stream key an ID must be specified"
                .to_string(),
        ));
    }
    let (keys, ids) = rest.split_at(rest.len() / 2);

    Ok(XReadRequest {
        count,
        block_ms,
        keys: keys.to_vec(),
        ids: ids.to_vec(),
    })
}

pub(super) fn handle_xread(engine: &Engine, command: &ParsedCommand, ctx: &ExecContext) -> Result<Reply> {
    let request = parse_xread(&command.args)?;
    let store = engine.store();

    // `$` resolves once, so only entries added after this call count
    let starts = request
        .keys
        .iter()
        .zip(&request.ids)
        .map(|(key, id)| match id.as_str() {
            "$" => store.last_stream_id(key),
            id => StreamId::parse_range_start(id),
        })
        .collect::<Result<Vec<_>>>()?;

    let collect = || -> Result<Vec<Reply>> {
        let mut results = Vec::new();
        for (key, start) in request.keys.iter().zip(&starts) {
            let entries = store.xread(key, *start, request.count)?;
            if !entries.is_empty() {
                results.push(Reply::Array(vec![
                    Reply::bulk_str(key),
                    Reply::Array(entries.iter().map(StreamEntry::to_reply).collect()),
                ]));
            }
        }
        Ok(results)
    };

    let blocked = match request.block_ms {
        Some(ms) if !ctx.in_transaction => {
            let deadline = (ms > 0).then(|| Instant::now() + Duration::from_millis(ms));
            Some((engine.blocking().register(request.keys.clone()), deadline))
        }
        _ => None,
    };

    loop {
        let results = collect()?;
        if !results.is_empty() {
            return Ok(Reply::Array(results));
        }

        let Some((waiter, deadline)) = &blocked else {
            return Ok(Reply::Null);
        };
        if waiter.wait(*deadline) == WakeReason::TimedOut {
            let results = collect()?;
            return Ok(if results.is_empty() {
                Reply::Null
            } else {
                Reply::Array(results)
            });
        }
    }
}

// =============================================================================
// Argument parsing
// =============================================================================

fn parse_u64(input: &str) -> Result<u64> {
    input.parse::<u64>().map_err(|_| TideError::NotInteger)
}

fn parse_usize(input: &str) -> Result<usize> {
    input.parse::<usize>().map_err(|_| TideError::NotInteger)
}
