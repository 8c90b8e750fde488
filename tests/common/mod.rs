use std::fs::File;
use std::io::Error;
use std::path::Path;

/// Writes a script that opens `instructors` wallets and settles `charges` charges of 100
/// spread across them, half captured by webhook and half verified directly.
pub fn generate_charges(path: &Path, instructors: usize, charges: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["op", "user", "kind", "amount", "reference", "at"])?;
    for i in 0..instructors {
        wtr.write_record(["open", &format!("instructor-{i}"), "instructor", "", "", ""])?;
    }

    for n in 0..charges {
        let user = format!("instructor-{}", n % instructors);
        let receipt = format!("rcpt-{n}");
        wtr.write_record(["charge", &user, "courses", "100", &receipt, ""])?;
        let confirm = if n % 2 == 0 { "capture" } else { "verify" };
        wtr.write_record([confirm, "", "", "", &receipt, ""])?;
    }

    wtr.flush()?;
    Ok(())
}
