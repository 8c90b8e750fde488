use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("tests/fixtures/script.csv");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("owner,kind,balance,currency"))
        // 7500 from the captured charge, less the 5000 payout
        .stdout(predicate::str::contains("alice,INSTRUCTOR,2500,INR"))
        // 1500 from the charge, less 750 reversed by the partial refund
        .stdout(predicate::str::contains("bob,INSTRUCTOR,750,INR"))
        .stdout(predicate::str::contains("platform,PLATFORM_COMMISSION,1100,INR"))
        .stdout(predicate::str::contains("platform,PLATFORM_TAX,1650,INR"))
        .stderr(predicate::str::contains("Error processing event").not());

    Ok(())
}

#[test]
fn test_cli_missing_input_fails() {
    let mut cmd = Command::new(cargo_bin!("ledgerd"));
    cmd.arg("tests/fixtures/does_not_exist.csv");

    cmd.assert().failure();
}

#[test]
fn test_cli_rejects_invalid_config() {
    let mut config = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(
        &mut config,
        br#"{"split_rates": {"instructor": "0.5", "commission": "0.1", "tax": "0.1"}}"#,
    )
    .unwrap();

    let mut cmd = Command::new(cargo_bin!("ledgerd"));
    cmd.arg("tests/fixtures/script.csv")
        .arg("--config")
        .arg(config.path());

    cmd.assert().failure();
}
