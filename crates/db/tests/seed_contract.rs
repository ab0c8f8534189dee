//! Static validation of the demo seed fixture: every reference inside
//! the SQL must resolve against the rows the same file creates, and the
//! rule chains it configures must be routable by the engine.

use std::collections::HashSet;

use tripflow_db::DemoSeedDataset;

fn quoted_values_after(sql: &str, marker: &str) -> Vec<String> {
    // Collects 'single-quoted' literals from the INSERT section that
    // follows `marker`, up to the next statement terminator.
    let section_start = sql.find(marker).unwrap_or_else(|| panic!("marker `{marker}` in seed"));
    let section = &sql[section_start..];
    let section_end = section.find(';').map_or(section.len(), |end| end);
    let section = &section[..section_end];

    let mut values = Vec::new();
    let mut rest = section;
    while let Some(start) = rest.find('\'') {
        let tail = &rest[start + 1..];
        let Some(end) = tail.find('\'') else { break };
        values.push(tail[..end].to_string());
        rest = &tail[end + 1..];
    }
    values
}

fn seeded_ids(prefix: &str, values: &[String]) -> HashSet<String> {
    values.iter().filter(|value| value.starts_with(prefix)).cloned().collect()
}

#[test]
fn seeded_reporting_links_resolve_to_seeded_employees() {
    let employee_values = quoted_values_after(DemoSeedDataset::SQL, "INSERT INTO employee");
    let employee_ids = seeded_ids("emp-demo-", &employee_values);
    assert_eq!(employee_ids.len(), 6, "expected six demo employees");

    // Every emp-demo-* literal in the employee section is either a row
    // id or a reporting link; both must resolve.
    for value in employee_values.iter().filter(|value| value.starts_with("emp-demo-")) {
        assert!(
            employee_ids.contains(value),
            "reporting link `{value}` does not resolve to a seeded employee"
        );
    }
}

#[test]
fn seeded_rules_reference_seeded_employees_only() {
    let rule_values = quoted_values_after(DemoSeedDataset::SQL, "INSERT INTO approval_rule");
    let employee_values = quoted_values_after(DemoSeedDataset::SQL, "INSERT INTO employee");
    let employee_ids = seeded_ids("emp-demo-", &employee_values);

    for value in rule_values.iter().filter(|value| value.starts_with("emp-demo-")) {
        assert!(
            employee_ids.contains(value),
            "rule references unknown employee `{value}`"
        );
    }
}

#[test]
fn every_seeded_chain_starts_at_sequence_one() {
    let rule_values = quoted_values_after(DemoSeedDataset::SQL, "INSERT INTO approval_rule");

    // Each (kind, phase) pair seeded must carry a catch-all rule so any
    // submitter can be routed.
    for (kind, phase) in [
        ("travel_permit", "submission"),
        ("travel_permit", "settlement"),
        ("assignment_letter", "submission"),
        ("assignment_letter", "settlement"),
    ] {
        let kind_positions: Vec<usize> = rule_values
            .iter()
            .enumerate()
            .filter(|(_, value)| value.as_str() == kind)
            .map(|(index, _)| index)
            .collect();
        let has_catch_all = kind_positions.iter().any(|&index| {
            rule_values.get(index + 1).map(String::as_str) == Some(phase)
                && rule_values.get(index + 2).map(String::as_str) == Some("catch_all")
        });
        assert!(has_catch_all, "no catch-all rule seeded for {kind}/{phase}");
    }
}

#[test]
fn seeded_request_belongs_to_a_seeded_submitter() {
    let request_values = quoted_values_after(DemoSeedDataset::SQL, "INSERT INTO travel_request");
    let employee_values = quoted_values_after(DemoSeedDataset::SQL, "INSERT INTO employee");
    let employee_ids = seeded_ids("emp-demo-", &employee_values);

    let submitters: Vec<&String> =
        request_values.iter().filter(|value| value.starts_with("emp-demo-")).collect();
    assert!(!submitters.is_empty(), "seeded request must name a submitter");
    for submitter in submitters {
        assert!(
            employee_ids.contains(submitter),
            "request submitter `{submitter}` is not a seeded employee"
        );
    }
}
