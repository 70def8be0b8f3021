// 📥 CSV import - movement and statement fixtures
//
// Amount columns are read as text and parsed into Decimal, never through a
// float. Rows are validated as they are read; the first bad row aborts the
// load with its line number.

use crate::models::{AccountEntry, FileMovement, Movement};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// One line of a movements CSV
#[derive(Debug, Deserialize)]
struct MovementRecord {
    id: i64,
    transfer_id: String,
    owner_id: String,
    number: i64,
    amount_index: i64,
    loop_id: String,
    currency: String,
    issuer_id: String,
    peer_id: String,
    ts: String,
    #[serde(default)]
    action: String,
    period_id: i64,
    wallet_delta: String,
    vault_delta: String,
}

/// One line of a statement CSV
#[derive(Debug, Deserialize)]
struct EntryRecord {
    id: i64,
    statement_id: i64,
    period_id: i64,
    entry_date: String,
    delta: String,
    description: String,
    currency: String,
    loop_id: String,
    peer_id: String,
}

fn parse_amount(text: &str, column: &str) -> Result<Decimal> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(text).with_context(|| format!("Invalid {} amount: {:?}", column, text))
}

impl MovementRecord {
    fn into_file_movement(self) -> Result<FileMovement> {
        let ts = DateTime::parse_from_rfc3339(self.ts.trim())
            .with_context(|| format!("Invalid timestamp: {:?}", self.ts))?
            .with_timezone(&Utc);

        Ok(FileMovement {
            wallet_delta: parse_amount(&self.wallet_delta, "wallet_delta")?,
            vault_delta: parse_amount(&self.vault_delta, "vault_delta")?,
            period_id: self.period_id,
            reco_id: None,
            movement: Movement {
                id: self.id,
                transfer_id: self.transfer_id,
                owner_id: self.owner_id,
                number: self.number,
                amount_index: self.amount_index,
                loop_id: self.loop_id,
                currency: self.currency,
                issuer_id: self.issuer_id,
                peer_id: self.peer_id,
                ts,
                action: self.action,
            },
        })
    }
}

impl EntryRecord {
    fn into_account_entry(self) -> Result<AccountEntry> {
        let entry_date = NaiveDate::from_str(self.entry_date.trim())
            .with_context(|| format!("Invalid entry date: {:?}", self.entry_date))?;

        let delta = parse_amount(&self.delta, "delta")?;
        if delta.is_zero() {
            bail!("Statement entry {} has a zero delta", self.id);
        }

        Ok(AccountEntry {
            delta,
            id: self.id,
            statement_id: self.statement_id,
            period_id: self.period_id,
            entry_date,
            description: self.description,
            currency: self.currency,
            loop_id: self.loop_id,
            peer_id: self.peer_id,
            reco_id: None,
        })
    }
}

pub fn read_movements<R: Read>(reader: R) -> Result<Vec<FileMovement>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut movements = Vec::new();

    for (index, result) in rdr.deserialize().enumerate() {
        // Header is line 1
        let line = index + 2;
        let record: MovementRecord =
            result.with_context(|| format!("Failed to deserialize movement on line {}", line))?;
        movements.push(
            record
                .into_file_movement()
                .with_context(|| format!("Bad movement on line {}", line))?,
        );
    }

    Ok(movements)
}

pub fn read_account_entries<R: Read>(reader: R) -> Result<Vec<AccountEntry>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut entries = Vec::new();

    for (index, result) in rdr.deserialize().enumerate() {
        let line = index + 2;
        let record: EntryRecord =
            result.with_context(|| format!("Failed to deserialize entry on line {}", line))?;
        entries.push(
            record
                .into_account_entry()
                .with_context(|| format!("Bad statement entry on line {}", line))?,
        );
    }

    Ok(entries)
}

pub fn load_movements_csv(csv_path: &Path) -> Result<Vec<FileMovement>> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open CSV file: {:?}", csv_path))?;
    read_movements(file)
}

pub fn load_account_entries_csv(csv_path: &Path) -> Result<Vec<AccountEntry>> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open CSV file: {:?}", csv_path))?;
    read_account_entries(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MOVEMENTS: &str = "\
id,transfer_id,owner_id,number,amount_index,loop_id,currency,issuer_id,peer_id,ts,action,period_id,wallet_delta,vault_delta
1,6502,owner,1,0,0,USD,issuer,bank,2018-01-15T10:00:00Z,,1,0,-2.00
2,6502,owner,2,0,0,USD,issuer,bank,2018-01-15T10:05:00+00:00,move,1,0.10,
";

    const ENTRIES: &str = "\
id,statement_id,period_id,entry_date,delta,description,currency,loop_id,peer_id
10,3,1,2018-01-16,-2.00,ACH T6502,USD,0,bank
";

    #[test]
    fn test_read_movements() {
        let movements = read_movements(MOVEMENTS.as_bytes()).unwrap();

        assert_eq!(movements.len(), 2);
        assert_eq!(movements[0].delta(), dec!(-2.00));
        assert_eq!(movements[0].movement.action, "");
        assert_eq!(movements[1].movement.action, "move");
        // Blank vault column reads as zero
        assert_eq!(movements[1].delta(), dec!(0.10));
        assert!(movements.iter().all(|fm| fm.reco_id.is_none()));
    }

    #[test]
    fn test_read_account_entries() {
        let entries = read_account_entries(ENTRIES.as_bytes()).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].statement_id, 3);
        assert_eq!(entries[0].delta, dec!(-2.00));
        assert_eq!(entries[0].description, "ACH T6502");
        assert_eq!(
            entries[0].entry_date,
            NaiveDate::from_ymd_opt(2018, 1, 16).unwrap()
        );
    }

    #[test]
    fn test_bad_amount_reports_line() {
        let csv = "\
id,statement_id,period_id,entry_date,delta,description,currency,loop_id,peer_id
10,3,1,2018-01-16,-2.00,ok,USD,0,bank
11,3,1,2018-01-16,two,broken,USD,0,bank
";

        let err = read_account_entries(csv.as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("line 3"));
    }

    #[test]
    fn test_zero_delta_entry_is_rejected() {
        for delta in ["0", "0.00", ""] {
            let csv = format!(
                "id,statement_id,period_id,entry_date,delta,description,currency,loop_id,peer_id\n\
                 10,3,1,2018-01-16,-2.00,ok,USD,0,bank\n\
                 11,3,1,2018-01-16,{},empty,USD,0,bank\n",
                delta
            );

            let err = read_account_entries(csv.as_bytes()).unwrap_err();
            let message = format!("{:#}", err);
            assert!(message.contains("line 3"), "{}", message);
            assert!(message.contains("zero delta"), "{}", message);
        }
    }

    #[test]
    fn test_bad_timestamp_fails() {
        let csv = "\
id,transfer_id,owner_id,number,amount_index,loop_id,currency,issuer_id,peer_id,ts,action,period_id,wallet_delta,vault_delta
1,6502,owner,1,0,0,USD,issuer,bank,yesterday,,1,0,-2.00
";

        assert!(read_movements(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_missing_file_fails() {
        assert!(load_movements_csv(Path::new("/nonexistent/movements.csv")).is_err());
    }
}
