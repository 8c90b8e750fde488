use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn script(rows: &[[&str; 6]]) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    let mut wtr = csv::Writer::from_path(file.path()).unwrap();
    wtr.write_record(["op", "user", "kind", "amount", "reference", "at"])
        .unwrap();
    for row in rows {
        wtr.write_record(row).unwrap();
    }
    wtr.flush().unwrap();
    file
}

#[test]
fn test_malformed_csv_handling() {
    let input = script(&[
        ["open", "alice", "instructor", "", "", ""],
        // Unknown operation
        ["explode", "alice", "", "1.0", "", ""],
        // Text in amount field
        ["adjust", "alice", "instructor", "not_a_number", "", ""],
        // Missing amount is a processing error, not a reading one
        ["adjust", "alice", "instructor", "", "", ""],
        ["adjust", "alice", "instructor", "3.0", "", ""],
    ]);

    let mut cmd = Command::new(cargo_bin!("ledgerd"));
    cmd.arg(input.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading event"))
        .stderr(predicate::str::contains("Error processing event"))
        .stdout(predicate::str::contains("alice,INSTRUCTOR,3,INR"));
}

#[test]
fn test_out_of_order_operations() {
    let input = script(&[
        // Capture before the order exists
        ["capture", "", "", "", "rcpt-1", ""],
        // Charge against a user with no wallet
        ["charge", "carol", "", "100", "rcpt-1", ""],
        // Refund of something never paid
        ["refund", "", "", "", "rcpt-1", ""],
        ["open", "carol", "instructor", "", "", ""],
        ["charge", "carol", "", "100", "rcpt-2", ""],
        ["capture", "", "", "", "rcpt-2", ""],
        // Second capture of the same order is rejected by the gateway
        ["capture", "", "", "", "rcpt-2", ""],
    ]);

    let mut cmd = Command::new(cargo_bin!("ledgerd"));
    cmd.arg(input.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error processing event"))
        .stdout(predicate::str::contains("carol,INSTRUCTOR,75,INR"))
        .stdout(predicate::str::contains("platform,PLATFORM_TAX,15,INR"));
}

#[test]
fn test_overdrawn_payout_is_rejected() {
    let input = script(&[
        ["open", "dave", "instructor", "", "", ""],
        ["adjust", "dave", "instructor", "1500", "", ""],
        ["payout", "dave", "", "2000", "p1", ""],
        ["process", "", "", "", "p1", ""],
    ]);

    let mut cmd = Command::new(cargo_bin!("ledgerd"));
    cmd.arg(input.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Insufficient funds"))
        .stdout(predicate::str::contains("dave,INSTRUCTOR,1500,INR"));
}
