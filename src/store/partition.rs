use std::fmt;
use std::str::FromStr;

/// A namespace inside the local store. Keys are unique only within a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
  /// Singleton values used to restore state across sessions
  Meta,
  /// In-progress form values, one mapping per module
  Drafts,
  /// Append-only record sequences keyed by module storage key
  Records,
}

impl Partition {
  pub const ALL: [Partition; 3] = [Partition::Meta, Partition::Drafts, Partition::Records];

  pub fn name(self) -> &'static str {
    match self {
      Partition::Meta => "meta",
      Partition::Drafts => "drafts",
      Partition::Records => "records",
    }
  }

  /// Backing table name. Always one of a fixed set, so safe to splice into SQL.
  pub(crate) fn table(self) -> &'static str {
    self.name()
  }
}

impl fmt::Display for Partition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for Partition {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Partition::ALL
      .into_iter()
      .find(|p| p.name() == s.trim().to_lowercase())
      .ok_or_else(|| format!("unknown partition '{}' (expected meta, drafts or records)", s))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_partition_names() {
    assert_eq!("meta".parse::<Partition>(), Ok(Partition::Meta));
    assert_eq!(" Drafts ".parse::<Partition>(), Ok(Partition::Drafts));
    assert_eq!("records".parse::<Partition>(), Ok(Partition::Records));
  }

  #[test]
  fn test_parse_unknown_partition() {
    assert!("sessions".parse::<Partition>().is_err());
  }
}
