// DANS : src/bin/relay_client.rs
//
// Client de diagnostic : se connecte au relais, s'abonne à des tokens et
// affiche ce qu'il reçoit. Avec --analyze, décode les transactions.
//
// Usage : relay_client [--url ws://localhost:8080] [--analyze] [MINT[:CREATOR] ...]

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};
use geyser_relay::{
    communication::{subscribe_message, Frame, TransactionUpdate},
    decoders::{
        programs::{self, KnownProgram},
        transaction::{self, DecodedInstruction},
    },
    subscription::TokenWatch,
};

const DEFAULT_URL: &str = "ws://localhost:8080";
const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

#[derive(Debug)]
struct ClientArgs {
    url: String,
    analyze: bool,
    tokens: Vec<TokenWatch>,
}

impl ClientArgs {
    fn parse(args: impl Iterator<Item = String>) -> Result<Self> {
        let mut url = DEFAULT_URL.to_string();
        let mut analyze = false;
        let mut tokens = Vec::new();
        let mut args = args;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--analyze" => analyze = true,
                "--url" => url = args.next().ok_or_else(|| anyhow!("--url attend une valeur"))?,
                token => {
                    // Sans créateur explicite, le mint sert aussi de créateur.
                    let (mint, creator) = token.split_once(':').unwrap_or((token, token));
                    tokens.push(TokenWatch { mint: mint.to_string(), creator: creator.to_string() });
                }
            }
        }
        if tokens.is_empty() {
            tokens.push(TokenWatch { mint: USDC_MINT.to_string(), creator: USDC_MINT.to_string() });
        }
        Ok(Self { url, analyze, tokens })
    }
}

fn describe_instruction(ix: &DecodedInstruction) -> String {
    let opcode_name = match (programs::lookup(&ix.program_id), ix.opcode) {
        (Some(KnownProgram::TokenProgram), Some(op)) => programs::token_instruction_name(op),
        (Some(KnownProgram::SystemProgram), Some(op)) => programs::system_instruction_name(op),
        _ => None,
    };
    match (ix.opcode, opcode_name) {
        (Some(op), Some(name)) => format!("{} [{} = {}] {:?}", ix.program_name, op, name, ix.classification),
        (Some(op), None) => format!("{} [{}] {:?}", ix.program_name, op, ix.classification),
        _ => ix.program_name.clone(),
    }
}

fn analyze_transaction(tx: &TransactionUpdate) {
    let decoded = match tx.decoded.clone().map(Ok).unwrap_or_else(|| transaction::decode_update(tx)) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(error = %e, slot = tx.slot, "[Client] Transaction non décodable.");
            return;
        }
    };

    println!("\n--- Transaction {} ---", decoded.signature);
    println!("  Slot: {} | Succès: {}", decoded.slot, decoded.success);
    println!("  Comptes impliqués: {} | Signataire: {}", decoded.account_keys.len(), decoded.signer().unwrap_or("?"));
    println!("  Instructions: {}", decoded.instructions.len());
    for (index, ix) in decoded.instructions.iter().enumerate() {
        println!("    {}. {}", index + 1, describe_instruction(ix));
        if ix.classification.is_transfer() {
            println!("       -> TRANSFERT détecté ({:?})", ix.classification);
        }
    }
    if !decoded.inner_instruction_groups.is_empty() {
        println!("  Instructions internes: {}", decoded.inner_instruction_groups.len());
        for group in &decoded.inner_instruction_groups {
            println!("    Inner IX {}:", group.index);
            for ix in &group.instructions {
                println!("      - {}", describe_instruction(ix));
            }
        }
    }
    for evidence in &decoded.transfer_evidence {
        match evidence.amount {
            Some(amount) => println!("    [log] {} (montant: {})", evidence.log, amount),
            None => println!("    [log] {}", evidence.log),
        }
    }
    println!("{}", "-".repeat(50));
}

fn print_frame(text: &str, analyze: bool) {
    match serde_json::from_str::<Frame>(text) {
        Ok(Frame::Account(a)) => info!(
            pubkey = %a.pubkey, owner = %a.owner, lamports = a.lamports,
            data_len = a.data_len, slot = a.slot, "[Client] ACCOUNT UPDATE"
        ),
        Ok(Frame::Transaction(tx)) if analyze => analyze_transaction(&tx),
        Ok(Frame::Transaction(tx)) => info!(
            slot = tx.slot,
            signature = %bs58::encode(&tx.transaction.signature).into_string(),
            accounts = tx.transaction.message.as_ref().map(|m| m.account_keys.len()).unwrap_or(0),
            success = !tx.transaction.meta.as_ref().map(|m| m.failed).unwrap_or(false),
            "[Client] TRANSACTION"
        ),
        Ok(Frame::Slot(s)) => info!(slot = s.slot, parent = ?s.parent, status = %s.status, "[Client] SLOT UPDATE"),
        Ok(Frame::Pong(p)) => info!(id = p.id, "[Client] PONG"),
        Err(_) => info!(raw = %text, "[Client] Données brutes reçues."),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    geyser_relay::monitoring::logging::setup_console_logging();
    let args = ClientArgs::parse(std::env::args().skip(1))?;

    let (ws, _) = connect_async(args.url.as_str())
        .await
        .with_context(|| format!("Connexion au relais {} impossible", args.url))?;
    info!(url = %args.url, "[Client] Connecté au relais.");
    let (mut sink, mut source) = ws.split();

    let request = subscribe_message(&args.tokens);
    sink.send(Message::Text(request.to_string())).await?;
    info!(tokens = args.tokens.len(), "[Client] Demande d'abonnement envoyée.");

    loop {
        tokio::select! {
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => print_frame(&text, args.analyze),
                Some(Ok(Message::Close(_))) | None => {
                    info!("[Client] Connexion fermée.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "[Client] Erreur WebSocket.");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("[Client] Fermeture de la connexion...");
                let _ = sink.close().await;
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> ClientArgs {
        ClientArgs::parse(raw.iter().map(|s| s.to_string())).unwrap()
    }

    #[test]
    fn defaults_to_usdc_on_localhost() {
        let parsed = args(&[]);
        assert_eq!(parsed.url, DEFAULT_URL);
        assert!(!parsed.analyze);
        assert_eq!(parsed.tokens, vec![TokenWatch { mint: USDC_MINT.into(), creator: USDC_MINT.into() }]);
    }

    #[test]
    fn parses_flags_and_token_pairs() {
        let parsed = args(&["--analyze", "--url", "ws://relay:9000", "M1:C1", "M2"]);
        assert!(parsed.analyze);
        assert_eq!(parsed.url, "ws://relay:9000");
        assert_eq!(parsed.tokens[0], TokenWatch { mint: "M1".into(), creator: "C1".into() });
        assert_eq!(parsed.tokens[1], TokenWatch { mint: "M2".into(), creator: "M2".into() });
    }

    #[test]
    fn url_flag_requires_a_value() {
        assert!(ClientArgs::parse(["--url".to_string()].into_iter()).is_err());
    }
}
