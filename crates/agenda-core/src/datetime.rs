use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  SecondsFormat,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "agenda-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "AGENDA_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "AGENDA_TIME_CONFIG";
pub const DEFAULT_TIMEZONE: &str =
  "America/Sao_Paulo";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// Resolves the timezone a session renders in.
///
/// Order: the `timezone` config key, the
/// `AGENDA_TIMEZONE` variable, an
/// `agenda-time.toml` file, then
/// [`DEFAULT_TIMEZONE`]. Invalid sources are
/// logged and skipped.
pub fn resolve_timezone(
  configured: Option<&str>
) -> Tz {
  if let Some(raw) = configured
    && let Some(tz) =
      parse_timezone(raw, "config")
  {
    return tz;
  }

  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_TIMEZONE,
    "DEFAULT_TIMEZONE"
  )
  .unwrap_or_else(|| {
    tracing::error!(
      "failed to parse fallback \
       timezone; using UTC"
    );
    chrono_tz::UTC
  })
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &Path
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "resolved timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Parses a backend timestamp. Only
/// offset-carrying forms are accepted; any
/// other text yields `None`.
#[must_use]
pub fn parse_timestamp(
  raw: &str
) -> Option<DateTime<Utc>> {
  let trimmed = raw.trim();
  if let Ok(dt) =
    DateTime::parse_from_rfc3339(
      trimmed
    )
  {
    return Some(dt.with_timezone(&Utc));
  }

  for fmt in [
    "%Y-%m-%d %H:%M:%S%#z",
    "%Y-%m-%d %H:%M:%S%.f%#z"
  ] {
    if let Ok(dt) =
      DateTime::parse_from_str(
        trimmed, fmt
      )
    {
      return Some(
        dt.with_timezone(&Utc)
      );
    }
  }

  None
}

#[must_use]
pub fn format_timestamp(
  dt: DateTime<Utc>
) -> String {
  dt.to_rfc3339_opts(
    SecondsFormat::Secs,
    true
  )
}

#[must_use]
pub fn local_date(
  dt: DateTime<Utc>,
  tz: Tz
) -> NaiveDate {
  dt.with_timezone(&tz).date_naive()
}

#[must_use]
pub fn format_local(
  dt: DateTime<Utc>,
  tz: Tz,
  fmt: &str
) -> String {
  dt.with_timezone(&tz)
    .format(fmt)
    .to_string()
}

/// Local midnight of `date` in `tz`, as UTC.
/// Days whose midnight is skipped by a DST
/// jump start at the first valid instant.
#[must_use]
pub fn local_midnight(
  date: NaiveDate,
  tz: Tz
) -> DateTime<Utc> {
  let mut naive =
    date.and_time(chrono::NaiveTime::MIN);
  for _ in 0..4 {
    match tz.from_local_datetime(&naive)
    {
      | LocalResult::Single(dt) => {
        return dt.with_timezone(&Utc);
      }
      | LocalResult::Ambiguous(
        first,
        second
      ) => {
        return first
          .min(second)
          .with_timezone(&Utc);
      }
      | LocalResult::None => {
        naive += Duration::hours(1);
      }
    }
  }
  DateTime::<Utc>::from_naive_utc_and_offset(
    naive, Utc
  )
}

fn to_utc_from_local(
  local_naive: NaiveDateTime,
  tz: Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  match tz.from_local_datetime(
    &local_naive
  ) {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      Ok(
        first
          .min(second)
          .with_timezone(&Utc)
      )
    }
    | LocalResult::None => {
      Err(anyhow!(
        "local datetime does not \
         exist in timezone {tz}: \
         {context}"
      ))
    }
  }
}

#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => {
      return Ok(local_midnight(
        local_date(now, tz),
        tz
      ));
    }
    | "tomorrow" => {
      return Ok(local_midnight(
        local_date(now, tz)
          + Duration::days(1),
        tz
      ));
    }
    | "yesterday" => {
      return Ok(local_midnight(
        local_date(now, tz)
          - Duration::days(1),
        tz
      ));
    }
    | _ => {}
  }

  if let Some(target_weekday) =
    parse_weekday_name(&lower)
  {
    let target_date = next_weekday_date(
      local_date(now, tz),
      target_weekday
    );
    return Ok(local_midnight(
      target_date,
      tz
    ));
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[wdhm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(token)
  {
    let sign = caps
      .name("sign")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative sign")
      })?;
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative unit")
      })?;

    let duration = match unit {
      | "w" => Duration::weeks(num),
      | "d" => Duration::days(num),
      | "h" => Duration::hours(num),
      | "m" => Duration::minutes(num),
      | _ => {
        return Err(anyhow!(
          "unknown relative unit: \
           {unit}"
        ));
      }
    };

    return Ok(
      if sign == "-" {
        now - duration
      } else {
        now + duration
      }
    );
  }

  if let Some(dt) =
    parse_timestamp(token)
  {
    return Ok(dt);
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Ok(local_midnight(
      date, tz
    ));
  }

  for fmt in
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return to_utc_from_local(
        ndt, tz, fmt
      );
    }
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     now/today/tomorrow/yesterday, \
     weekday names (e.g. monday), \
     +Nw/+Nd/+Nh/+Nm, RFC3339, \
     YYYY-MM-DD, YYYY-MM-DDTHH:MM, \
     YYYY-MM-DD HH:MM"
  })
}

/// Human label for how long ago `past`
/// happened, as shown in the activity feed.
#[must_use]
pub fn relative_time(
  past: DateTime<Utc>,
  now: DateTime<Utc>
) -> String {
  let elapsed = now - past;
  let mins = elapsed.num_minutes();
  let hours = elapsed.num_hours();
  let days = elapsed.num_days();

  if mins < 1 {
    "just now".to_string()
  } else if mins < 60 {
    format!(
      "{mins} minute{} ago",
      plural(mins)
    )
  } else if hours < 24 {
    format!(
      "{hours} hour{} ago",
      plural(hours)
    )
  } else {
    format!(
      "{days} day{} ago",
      plural(days)
    )
  }
}

fn plural(n: i64) -> &'static str {
  if n == 1 { "" } else { "s" }
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = i64::from(
    from
      .weekday()
      .num_days_from_monday()
  );
  let target_idx = i64::from(
    target.num_days_from_monday()
  );
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}

#[cfg(test)]
mod tests {
  use chrono::{
    TimeZone,
    Utc
  };

  use super::{
    format_local,
    local_date,
    parse_date_expr,
    parse_timestamp,
    relative_time
  };

  const SP: chrono_tz::Tz =
    chrono_tz::America::Sao_Paulo;

  #[test]
  fn parses_offset_timestamps_only() {
    assert!(
      parse_timestamp(
        "2024-09-24T14:00:00-03:00"
      )
      .is_some()
    );
    assert!(
      parse_timestamp(
        "2024-09-24 17:00:00+00"
      )
      .is_some()
    );
    assert!(
      parse_timestamp("not a date")
        .is_none()
    );
    assert!(
      parse_timestamp("").is_none()
    );
  }

  #[test]
  fn parses_local_datetime_in_timezone()
  {
    let now = Utc
      .with_ymd_and_hms(
        2024, 9, 20, 12, 0, 0
      )
      .single()
      .expect("valid now");
    let parsed = parse_date_expr(
      "2024-09-24T14:00",
      now,
      SP
    )
    .expect("parse local datetime");
    assert_eq!(
      format_local(parsed, SP, "%H:%M"),
      "14:00"
    );
    assert_eq!(
      parsed
        .format("%H:%M")
        .to_string(),
      "17:00"
    );
  }

  #[test]
  fn parses_weekday_name() {
    let now = Utc
      .with_ymd_and_hms(
        2024, 9, 24, 15, 0, 0
      )
      .single()
      .expect("valid now");
    let parsed =
      parse_date_expr("friday", now, SP)
        .expect("parse weekday");
    assert_eq!(
      local_date(parsed, SP)
        .format("%Y-%m-%d")
        .to_string(),
      "2024-09-27"
    );
  }

  #[test]
  fn parses_relative_weeks() {
    let now = Utc
      .with_ymd_and_hms(
        2024, 9, 24, 15, 0, 0
      )
      .single()
      .expect("valid now");
    let parsed =
      parse_date_expr("+2w", now, SP)
        .expect("parse relative");
    assert_eq!(
      (parsed - now).num_days(),
      14
    );
  }

  #[test]
  fn rejects_garbage() {
    let now = Utc::now();
    assert!(
      parse_date_expr(
        "someday", now, SP
      )
      .is_err()
    );
  }

  #[test]
  fn relative_time_labels() {
    let now = Utc
      .with_ymd_and_hms(
        2024, 9, 24, 15, 0, 0
      )
      .single()
      .expect("valid now");
    assert_eq!(
      relative_time(now, now),
      "just now"
    );
    assert_eq!(
      relative_time(
        now
          - chrono::Duration::minutes(1),
        now
      ),
      "1 minute ago"
    );
    assert_eq!(
      relative_time(
        now - chrono::Duration::hours(5),
        now
      ),
      "5 hours ago"
    );
    assert_eq!(
      relative_time(
        now - chrono::Duration::days(3),
        now
      ),
      "3 days ago"
    );
  }
}
