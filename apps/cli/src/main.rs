mod config;

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use clap::Parser;
use client_core::{
    ledger, CommitmentBridge, CommitmentStatus, LedgerSettings, MissingLedgerConnector,
    NegotiationOrchestrator, NegotiationWizard, SessionClient,
};
use shared::domain::{Party, SessionParams};

#[derive(Parser, Debug)]
struct Args {
    /// Which side of the deal this client negotiates: buyer or seller.
    #[arg(long, default_value = "buyer")]
    role: String,
    /// Address of the connected signing identity.
    #[arg(long)]
    wallet_address: String,
    #[arg(long)]
    buyer_address: Option<String>,
    #[arg(long)]
    seller_address: Option<String>,
    #[arg(long, default_value_t = 75.0)]
    target_price: f64,
    #[arg(long, default_value_t = 50.0)]
    min_price: f64,
    #[arg(long, default_value_t = 100.0)]
    max_price: f64,
    #[arg(long, default_value_t = 1)]
    quantity: u32,
    #[arg(long, default_value_t = 0.5)]
    fairness_weight: f64,
    #[arg(long, default_value_t = 8)]
    max_rounds: u32,
    /// Overrides the configured negotiation service url.
    #[arg(long)]
    service_url: Option<String>,
    /// Overrides the configured ledger contract address.
    #[arg(long)]
    contract_address: Option<String>,
    /// Submit the finalized agreement to the ledger after negotiating.
    #[arg(long)]
    commit: bool,
}

fn parse_role(raw: &str) -> Result<Party> {
    match raw {
        "buyer" => Ok(Party::Buyer),
        "seller" => Ok(Party::Seller),
        other => Err(anyhow!("role must be 'buyer' or 'seller', got '{other}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = config::load_settings();
    if let Some(url) = args.service_url.clone() {
        settings.service_url = url;
    }
    if let Some(address) = args.contract_address.clone() {
        settings.contract_address = Some(address);
    }

    let role = parse_role(&args.role)?;
    let params = SessionParams {
        role,
        buyer_address: args
            .buyer_address
            .clone()
            .or_else(|| (role == Party::Buyer).then(|| args.wallet_address.clone())),
        seller_address: args
            .seller_address
            .clone()
            .or_else(|| (role == Party::Seller).then(|| args.wallet_address.clone())),
        target_price: args.target_price,
        min_price: args.min_price,
        max_price: args.max_price,
        quantity: args.quantity,
        fairness_weight: args.fairness_weight,
        max_rounds: args.max_rounds,
    };

    let service = SessionClient::with_timeout(
        &settings.service_url,
        Duration::from_secs(settings.request_timeout_seconds),
    )?;
    let orchestrator = NegotiationOrchestrator::new(service);
    // The signing connector comes from the embedding wallet application; the
    // CLI ships without one and reports submission as unavailable.
    let bridge = CommitmentBridge::new(
        Arc::new(MissingLedgerConnector),
        LedgerSettings {
            contract_address: settings.contract_address.clone(),
            confirmation_timeout: Duration::from_secs(settings.confirmation_timeout_seconds),
        },
    );
    let wizard = NegotiationWizard::new(orchestrator, bridge);

    let session_id = wizard.start_negotiation(params).await?;
    println!("Created session {}", session_id.0);

    let finalized = wizard.run_negotiation().await?;

    let offers = wizard.refresh_timeline().await?;
    println!("Negotiation timeline ({} offers):", offers.len());
    for offer in &offers {
        println!(
            "  round {:>2}  {:<6}  price {:>8.2}  qty {:>3}  fairness {:.2}  utility {:.2}",
            offer.round,
            offer.made_by.as_str(),
            offer.price,
            offer.quantity,
            offer.fairness,
            offer.utility
        );
    }

    println!(
        "Finalized agreement: {}",
        serde_json::to_string_pretty(&finalized)?
    );

    if args.commit {
        match ledger::build_record_call(&finalized, &args.wallet_address) {
            Ok(call) => println!(
                "Ledger call: recordAgreement({}, {}, {}, {}, {})",
                call.agreement_hash, call.party_a, call.party_b, call.price_units,
                call.quantity_units
            ),
            Err(err) => println!("Ledger call cannot be built: {err}"),
        }
        match wizard.commit_agreement(&args.wallet_address).await {
            Ok(record) => {
                println!(
                    "Transaction accepted: {}",
                    record.transaction_hash.as_deref().unwrap_or("<none>")
                );
                let mut updates = wizard.bridge().subscribe();
                let record = updates
                    .wait_for(|record| record.is_terminal())
                    .await?
                    .clone();
                match record.status {
                    CommitmentStatus::Confirmed => {
                        println!("Agreement recorded on the ledger.")
                    }
                    _ => println!(
                        "Commitment failed: {}",
                        record.error_message.unwrap_or_default()
                    ),
                }
            }
            Err(err) => println!("Commitment not submitted: {err}"),
        }
    } else {
        println!("Run again with --commit to record the agreement on the configured ledger.");
    }

    Ok(())
}
