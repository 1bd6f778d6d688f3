// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Example: watermark a FASTQ file for one recipient, or trace a copy.
//!
//! Set `RUST_LOG=aperture_watermark=debug` to watch the parameter search.
use std::fs;

use aperture_watermark::{DatasetKey, EngineConfig, Format, OptimizationObjective, Watermarker, WatermarkPayload};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        eprintln!("Usage: watermark_fastq <input.fastq> <dataset-uuid> <passphrase> [recipient-uuid]");
        eprintln!("       without a recipient the input is verified instead");
        std::process::exit(1);
    }

    let input = fs::read(&args[1]).expect("Could not read input");
    let dataset_id: Uuid = args[2].parse().expect("Dataset id is not a UUID");
    let key = DatasetKey::derive(&args[3], &dataset_id).expect("Key derivation failed");
    let config = EngineConfig::from_env().expect("Bad APERTURE_WM_* configuration");
    let wm = Watermarker::new(config).expect("Engine setup failed");

    match args.get(4) {
        Some(recipient) => {
            let recipient: Uuid = recipient.parse().expect("Recipient id is not a UUID");
            let payload = WatermarkPayload::issue(recipient, dataset_id);
            let out = wm
                .embed(&input, Format::Fastq, &payload, &key, &OptimizationObjective::default(), &wm.config().budget())
                .expect("Embed failed");
            let out_path = format!("{}.{}.fastq", args[1].trim_end_matches(".fastq"), payload.issuance_id);
            fs::write(&out_path, &out.bytes).expect("Could not write output");
            println!("Watermarked copy written to: {out_path}");
            println!("Issuance: {}", payload.issuance_id);
            println!("Parameters: {}", out.params);
            println!(
                "Changed {} of {} quality scores (mean delta {:.4})",
                out.report.unit_deltas_summary.units_changed,
                out.report.unit_deltas_summary.units_examined,
                out.report.unit_deltas_summary.mean_delta
            );
        }
        None => match wm.verify(&input, Format::Fastq, &key) {
            Ok(found) if found.authenticated => {
                let p = found.payload.expect("authenticated results carry a payload");
                println!("Recipient: {}", p.recipient_id);
                println!("Issued at: {} (issuance {})", p.issued_at, p.issuance_id);
                println!("Confidence: {:.3}", found.confidence);
            }
            Ok(found) => println!("No authenticated watermark (confidence {:.3})", found.confidence),
            Err(e) => eprintln!("Verify failed: {e}"),
        },
    }
}
