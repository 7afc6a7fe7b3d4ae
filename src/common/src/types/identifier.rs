use std::fmt;

use super::process::ProcessRecord;

/// How callers address a record. Input that parses as an integer is matched
/// against record ids first, then pids; it never falls back to a name
/// match, so a record whose name happens to be numeric is only reachable by
/// its id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identifier {
    Numeric(u32),
    Name(String),
}

impl Identifier {
    pub fn parse(raw: &str) -> Identifier {
        let raw = raw.trim();
        match raw.parse::<u32>() {
            Ok(value) => Identifier::Numeric(value),
            Err(_) => Identifier::Name(raw.to_string()),
        }
    }

    pub fn position(&self, records: &[ProcessRecord]) -> Option<usize> {
        match self {
            Identifier::Numeric(value) => records
                .iter()
                .position(|r| r.id == *value)
                .or_else(|| records.iter().position(|r| r.pid == Some(*value))),
            Identifier::Name(name) => records.iter().position(|r| r.name == *name),
        }
    }

    pub fn find<'a>(&self, records: &'a [ProcessRecord]) -> Option<&'a ProcessRecord> {
        self.position(records).map(|idx| &records[idx])
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Numeric(value) => write!(f, "{}", value),
            Identifier::Name(name) => write!(f, "{}", name),
        }
    }
}

impl From<&str> for Identifier {
    fn from(raw: &str) -> Self {
        Identifier::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;

    use super::*;
    use crate::types::process::ProcessStatus;

    fn record(id: u32, name: &str, pid: Option<u32>) -> ProcessRecord {
        ProcessRecord {
            id,
            name: name.into(),
            pid,
            script_path: "/srv/app.sh".into(),
            log_path: "/tmp/shepd/logs/app.log".into(),
            error_log_path: "/tmp/shepd/logs/app-error.log".into(),
            status: ProcessStatus::Online,
            instances: 1,
            restarts: 0,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            env: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn integer_input_checks_id_before_pid() {
        // record 1 has pid 0: an input of "0" must resolve to the record
        // whose id is 0, not the one whose pid is 0
        let records = vec![record(0, "a", Some(4242)), record(1, "b", Some(0))];
        let found = Identifier::parse("0").find(&records).unwrap();
        assert_eq!(found.name, "a");
    }

    #[test]
    fn integer_input_falls_back_to_pid() {
        let records = vec![record(0, "a", Some(4242))];
        let found = Identifier::parse("4242").find(&records).unwrap();
        assert_eq!(found.id, 0);
    }

    #[test]
    fn numeric_input_never_matches_a_name() {
        let records = vec![record(7, "123", None)];
        assert!(Identifier::parse("123").find(&records).is_none());
        assert_eq!(Identifier::parse("7").find(&records).unwrap().name, "123");
    }

    #[test]
    fn name_lookup() {
        let records = vec![record(0, "api", Some(10)), record(1, "worker", Some(11))];
        assert_eq!(Identifier::parse("worker").find(&records).unwrap().id, 1);
        assert!(Identifier::parse("missing").find(&records).is_none());
    }
}
