use labvm_core::hypervisor::DomainStatus;

/// Parse the table printed by `virsh list --all`.
///
/// ```text
///  Id   Name   State
/// ----------------------
///  1    i1     running
///  -    t1     shut off
/// ```
///
/// The state column is kept verbatim, including multi-word states.
pub fn parse_list_status(output: &str) -> Vec<DomainStatus> {
  output
    .lines()
    .filter_map(|line| {
      let line = line.trim();
      if line.is_empty() || line.chars().all(|c| c == '-') {
        return None;
      }

      let mut tokens = line.split_whitespace();
      let id = tokens.next()?;
      let name = tokens.next()?;
      if id == "Id" && name == "Name" {
        return None;
      }

      let status = tokens.collect::<Vec<_>>().join(" ");
      if status.is_empty() {
        return None;
      }
      Some(DomainStatus { vm_id: name.to_owned(), status })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  const LISTING: &str = " Id   Name          State
-------------------------------------
 3    lab-i1        running
 -    jammy-tpl     shut off
 7    lab-i2        paused

";

  #[test]
  fn parses_rows_and_skips_chrome() {
    let rows = parse_list_status(LISTING);
    let pairs: Vec<_> = rows.iter().map(|r| (r.vm_id.as_str(), r.status.as_str())).collect();
    assert_eq!(
      pairs,
      vec![("lab-i1", "running"), ("jammy-tpl", "shut off"), ("lab-i2", "paused")]
    );
  }

  #[test]
  fn empty_listing_yields_nothing() {
    assert!(parse_list_status(" Id   Name   State\n------------------\n\n").is_empty());
  }
}
