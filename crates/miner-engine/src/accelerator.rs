//! Pluggable batch-hash backend: a CPU reference implementation and an
//! external-subprocess implementation with the same contract.

use std::io::{BufRead, BufReader};
use std::ops::RangeInclusive;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use miner_core::{double_sha256, Target};
use thiserror::Error;

/// Failures scanning one chunk. All are recoverable at the worker level:
/// the worker falls back to [`CpuAccelerator`] for that chunk and continues.
#[derive(Error, Debug)]
pub enum AcceleratorError {
    #[error("accelerator scan timed out")]
    Timeout,

    #[error("accelerator subprocess exited with status {0}")]
    Exit(i32),

    #[error("accelerator protocol violation: {0}")]
    Protocol(String),

    #[error("accelerator subprocess I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of scanning one nonce range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// `(nonce, hash)` if a hash below target was found within the range.
    pub found: Option<(u32, [u8; 32])>,
    /// Number of nonces actually tried before stopping.
    pub attempts: u64,
}

/// A batch-hash backend. Implementations must agree on found/not-found
/// for identical inputs, modulo attempt-count granularity when exhausted.
pub trait Accelerator: Send {
    fn scan(
        &mut self,
        header_without_nonce: &[u8; 76],
        nonce_range: RangeInclusive<u32>,
        target: &Target,
    ) -> Result<ScanResult, AcceleratorError>;
}

/// Tight, branch-free-per-attempt CPU reference implementation. No
/// allocation per attempt: the nonce is written directly into bytes 76..80
/// of a reused local header buffer.
#[derive(Debug, Default)]
pub struct CpuAccelerator {
    header: [u8; 80],
}

impl Accelerator for CpuAccelerator {
    fn scan(
        &mut self,
        header_without_nonce: &[u8; 76],
        nonce_range: RangeInclusive<u32>,
        target: &Target,
    ) -> Result<ScanResult, AcceleratorError> {
        self.header[..76].copy_from_slice(header_without_nonce);

        let mut attempts = 0u64;
        for nonce in nonce_range {
            self.header[76..80].copy_from_slice(&nonce.to_le_bytes());
            let hash = double_sha256(&self.header);
            attempts += 1;

            if target.is_valid(&hash) {
                return Ok(ScanResult {
                    found: Some((nonce, hash)),
                    attempts,
                });
            }
        }

        Ok(ScanResult { found: None, attempts })
    }
}

/// Delegates scanning to an external subprocess, one invocation per chunk.
///
/// Protocol: the subprocess is spawned with `hex_header nonce_start
/// nonce_end hex_target` as arguments and must print exactly one line to
/// stdout before exiting:
/// - `FOUND <nonce> <hex_hash>`
/// - `EXHAUSTED <attempts>`
/// - `ERROR <message>`
pub struct SubprocessAccelerator {
    program: std::path::PathBuf,
    timeout: Duration,
}

impl SubprocessAccelerator {
    pub fn new(program: impl Into<std::path::PathBuf>, timeout: Duration) -> Self {
        SubprocessAccelerator {
            program: program.into(),
            timeout,
        }
    }
}

impl Accelerator for SubprocessAccelerator {
    fn scan(
        &mut self,
        header_without_nonce: &[u8; 76],
        nonce_range: RangeInclusive<u32>,
        target: &Target,
    ) -> Result<ScanResult, AcceleratorError> {
        let header_hex = miner_core::bytes_to_hex(header_without_nonce);
        let target_hex = miner_core::bytes_to_hex(&target.0);

        let mut child = Command::new(&self.program)
            .arg(&header_hex)
            .arg(nonce_range.start().to_string())
            .arg(nonce_range.end().to_string())
            .arg(&target_hex)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let started = Instant::now();
        let stdout = child.stdout.take().expect("stdout was piped");
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();

        loop {
            if started.elapsed() > self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AcceleratorError::Timeout);
            }
            let read = reader.read_line(&mut line)?;
            if read > 0 {
                break;
            }
            if let Some(status) = child.try_wait()? {
                return Err(AcceleratorError::Exit(status.code().unwrap_or(-1)));
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let status = child.wait()?;
        if !status.success() {
            return Err(AcceleratorError::Exit(status.code().unwrap_or(-1)));
        }

        parse_result_line(line.trim())
    }
}

fn parse_result_line(line: &str) -> Result<ScanResult, AcceleratorError> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("FOUND") => {
            let nonce: u32 = parts
                .next()
                .ok_or_else(|| AcceleratorError::Protocol("FOUND missing nonce".into()))?
                .parse()
                .map_err(|_| AcceleratorError::Protocol("FOUND nonce not a u32".into()))?;
            let hash_hex = parts
                .next()
                .ok_or_else(|| AcceleratorError::Protocol("FOUND missing hash".into()))?;
            let hash_bytes = miner_core::hex_to_bytes(hash_hex)
                .map_err(|_| AcceleratorError::Protocol("FOUND hash not valid hex".into()))?;
            if hash_bytes.len() != 32 {
                return Err(AcceleratorError::Protocol("FOUND hash not 32 bytes".into()));
            }
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&hash_bytes);
            Ok(ScanResult {
                found: Some((nonce, hash)),
                attempts: 1,
            })
        }
        Some("EXHAUSTED") => {
            let attempts: u64 = parts
                .next()
                .ok_or_else(|| AcceleratorError::Protocol("EXHAUSTED missing count".into()))?
                .parse()
                .map_err(|_| AcceleratorError::Protocol("EXHAUSTED count not a u64".into()))?;
            Ok(ScanResult { found: None, attempts })
        }
        Some("ERROR") => {
            let message = parts.collect::<Vec<_>>().join(" ");
            Err(AcceleratorError::Protocol(message))
        }
        _ => Err(AcceleratorError::Protocol(format!("unrecognized line: {line}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_accelerator_finds_genesis_nonce() {
        // Genesis header minus nonce, target = difficulty 1 (spec vector S3).
        let merkle_root_display = miner_core::hex_to_bytes(
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
        )
        .unwrap();
        let mut merkle_root = [0u8; 32];
        for i in 0..32 {
            merkle_root[i] = merkle_root_display[31 - i];
        }

        let mut header = [0u8; 76];
        header[0..4].copy_from_slice(&1i32.to_le_bytes());
        header[36..68].copy_from_slice(&merkle_root);
        header[68..72].copy_from_slice(&1_231_006_505u32.to_le_bytes());
        header[72..76].copy_from_slice(&0x1d00ffffu32.to_le_bytes());

        let target = Target::from_bits(0x1d00ffff);
        let mut accel = CpuAccelerator::default();
        let result = accel.scan(&header, 2_083_236_880..=2_083_236_899, &target).unwrap();

        assert_eq!(result.found.map(|(n, _)| n), Some(2_083_236_893));
    }

    #[test]
    fn test_cpu_accelerator_exhausts_without_match() {
        let header = [0u8; 76];
        let target = Target::from_bytes([0u8; 32]); // impossible to satisfy
        let mut accel = CpuAccelerator::default();
        let result = accel.scan(&header, 0..=999, &target).unwrap();

        assert_eq!(result.found, None);
        assert_eq!(result.attempts, 1000);
    }

    #[test]
    fn test_parse_result_line_variants() {
        let found = parse_result_line("FOUND 42 00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff").unwrap();
        assert_eq!(found.found.unwrap().0, 42);

        let exhausted = parse_result_line("EXHAUSTED 12345").unwrap();
        assert_eq!(exhausted.attempts, 12345);

        assert!(parse_result_line("ERROR accelerator offline").is_err());
        assert!(parse_result_line("garbage").is_err());
    }
}
