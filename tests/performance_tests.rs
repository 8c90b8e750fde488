use assert_cmd::cargo_bin;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::process::Command;

mod common;

#[test]
fn test_large_script_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("charges.csv");
    common::generate_charges(&input, 20, 5_000).expect("Failed to generate script");

    let output = Command::new(cargo_bin!("ledgerd"))
        .arg(&input)
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success(), "Binary failed to process script");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut total = Decimal::ZERO;
    let mut commission = Decimal::ZERO;
    for line in stdout.lines().skip(1) {
        let fields: Vec<&str> = line.split(',').collect();
        let balance: Decimal = fields[2].parse().unwrap();
        total += balance;
        if fields[1] == "PLATFORM_COMMISSION" {
            commission = balance;
        }
    }
    assert_eq!(total, dec!(500000));
    assert_eq!(commission, dec!(50000));
    assert!(stdout.contains("instructor-7,INSTRUCTOR,18750,INR"));
}
