//! Entry point for the LP and taker orchestrator daemons.

mod config;
mod lp;
#[cfg(test)]
mod test_support;
mod taker;

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use alloy_signer_local::PrivateKeySigner;
use anyhow::Context;
use clap::{Parser, Subcommand};
use swapcore::chain::evm::{AlloyHtlcAdapter, EvmChainAdapter};
use swapcore::chain::native::JsonRpcAdapter;
use swapcore::hd_wallet::{HdWallet, SigningRole};
use swapcore::keys::HdSigner;
use swapcore::persistence::FileStore;
use swapcore::registry::HttpRegistry;

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "swap-orchestrator", version, about = "Cross-chain HTLC atomic-swap settlement daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "SWAP_ORCHESTRATOR_CONFIG", default_value = "orchestrator.toml")]
    config: String,

    /// BIP-39 mnemonic used to derive claim/refund signing keys.
    #[arg(long, env = "SWAP_ORCHESTRATOR_MNEMONIC")]
    mnemonic: String,

    /// HD derivation index for this orchestrator instance's signing keys.
    #[arg(long, default_value_t = 0)]
    key_index: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the LP watcher/responder loop.
    Lp,
    /// Run the taker orchestrator loop.
    Taker,
    /// Lock the quote-chain leg of a new `QuoteToNative` swap and exit.
    Initiate {
        #[arg(long)]
        quote_chain: String,
        #[arg(long)]
        quote_amount_smallest_unit: u64,
        #[arg(long)]
        quote_amount: rust_decimal::Decimal,
        #[arg(long)]
        native_amount: rust_decimal::Decimal,
        #[arg(long)]
        timelock_seconds: u64,
        #[arg(long)]
        native_claim_address: String,
    },
    /// Generate a fresh mnemonic and exit (operator bootstrapping helper).
    Keygen,
    /// Print current config validation status and exit.
    Status,
}

#[tokio::main]
async fn main() {
    let exit_code = match run().await {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(error = %err, "fatal error");
            err.chain()
                .find_map(|cause| cause.downcast_ref::<swapcore::Error>())
                .map(|e| e.exit_code())
                .unwrap_or(1)
        }
    };
    std::process::exit(exit_code);
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if matches!(args.command, Command::Keygen) {
        let wallet = HdWallet::generate(bitcoin::Network::Bitcoin, 24)
            .context("failed to generate mnemonic")?;
        println!("{}", wallet.mnemonic_phrase());
        return Ok(());
    }

    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config))?;

    if matches!(args.command, Command::Status) {
        println!("config ok: {}", args.config);
        return Ok(());
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data dir {}", config.data_dir))?;

    let bitcoin_network = parse_bitcoin_network(&config.native.network)?;
    let hd_wallet = HdWallet::from_mnemonic(&args.mnemonic, bitcoin_network)
        .context("failed to load mnemonic")?;

    let claim_signer = Arc::new(HdSigner::for_role(&hd_wallet, SigningRole::Claim, args.key_index)?);
    let refund_signer = Arc::new(HdSigner::for_role(&hd_wallet, SigningRole::Refund, args.key_index)?);

    let native_adapter = Arc::new(JsonRpcAdapter::new(
        config.native.rpc_endpoint.clone(),
        config.native.rpc_user.clone(),
        config.native.rpc_password.clone(),
        bitcoin_network,
    )?);

    let evm_signer = load_evm_signer(&config)?;
    let mut evm_adapters: HashMap<String, Arc<dyn EvmChainAdapter>> = HashMap::new();
    for network in &config.evm_networks {
        let contract_address: alloy_primitives::Address = network
            .htlc_contract
            .parse()
            .with_context(|| format!("invalid htlc_contract for evm network {}", network.name))?;
        let adapter = AlloyHtlcAdapter::connect(&network.rpc_url, contract_address, evm_signer.clone())
            .await
            .with_context(|| format!("failed to connect EVM adapter for {}", network.name))?;
        evm_adapters.insert(network.name.clone(), Arc::new(adapter));
    }

    let registry = Arc::new(HttpRegistry::new(config.registry.base_url.clone()));
    let store: Arc<dyn swapcore::persistence::PersistenceStore> =
        Arc::new(FileStore::open(&config.data_dir).context("failed to open persistence store")?);

    for known in &config.known_htlcs {
        tracing::info!(
            hashlock = %known.hashlock_hex,
            native_address = %known.native_address,
            "loaded known HTLC fixture from configuration"
        );
    }

    let evm_confirmations = config
        .evm_networks
        .iter()
        .map(|n| n.reorg_depth)
        .max()
        .unwrap_or(12);

    match args.command {
        Command::Lp => {
            let orchestrator = lp::LpOrchestrator {
                native: native_adapter,
                evm: evm_adapters,
                evm_networks: config.evm_networks.clone(),
                registry,
                store,
                claim_signer,
                refund_signer,
                reorg_policy: config.reorg_policy_for(evm_confirmations),
                timelock: config.timelock.to_policy(),
                lp_native_addr: config.lp_native_addr.clone(),
                lp_quote_addr_per_chain: config.lp_quote_addr_per_chain.clone(),
                last_evm_block: std::sync::Mutex::new(HashMap::new()),
                last_native_height: AtomicU64::new(0),
            };
            orchestrator.run(config.poll_interval()).await?;
        }
        Command::Taker => {
            let lp_refund_pubkey = config
                .lp_refund_pubkey_hex
                .as_deref()
                .map(parse_pubkey_hex)
                .transpose()
                .context("invalid lp_refund_pubkey_hex")?;
            let orchestrator = taker::TakerOrchestrator {
                native: native_adapter,
                evm: evm_adapters,
                registry,
                store,
                claim_signer,
                refund_signer,
                reorg_policy: config.reorg_policy_for(evm_confirmations),
                lp_native_addr: config.lp_native_addr.clone(),
                lp_refund_pubkey,
            };
            orchestrator.run(config.poll_interval()).await?;
        }
        Command::Initiate {
            quote_chain,
            quote_amount_smallest_unit,
            quote_amount,
            native_amount,
            timelock_seconds,
            native_claim_address,
        } => {
            let network = config.evm_network(&quote_chain)?;
            let lp_quote_addr = config.lp_quote_addr(&quote_chain)?;
            let lp_refund_pubkey = config
                .lp_refund_pubkey_hex
                .as_deref()
                .map(parse_pubkey_hex)
                .transpose()
                .context("invalid lp_refund_pubkey_hex")?;
            let orchestrator = taker::TakerOrchestrator {
                native: native_adapter,
                evm: evm_adapters,
                registry,
                store,
                claim_signer,
                refund_signer,
                reorg_policy: config.reorg_policy_for(evm_confirmations),
                lp_native_addr: config.lp_native_addr.clone(),
                lp_refund_pubkey,
            };
            let swap_id = orchestrator
                .initiate_quote_to_native_swap(
                    &quote_chain,
                    &network.quote_token,
                    quote_amount_smallest_unit,
                    quote_amount,
                    native_amount,
                    lp_quote_addr,
                    timelock_seconds,
                    &native_claim_address,
                )
                .await?;
            println!("initiated swap {swap_id}");
        }
        Command::Keygen | Command::Status => unreachable!("handled above"),
    }

    Ok(())
}

fn load_evm_signer(config: &Config) -> anyhow::Result<Option<PrivateKeySigner>> {
    let Some(key_hex) = &config.evm_signing_key else {
        return Ok(None);
    };
    let signer: PrivateKeySigner = key_hex
        .parse()
        .context("invalid evm_signing_key: expected hex-encoded secp256k1 secret key")?;
    Ok(Some(signer))
}

fn parse_pubkey_hex(hex_str: &str) -> anyhow::Result<bitcoin::PublicKey> {
    let bytes = hex::decode(hex_str).context("invalid pubkey hex encoding")?;
    let pk = bitcoin::secp256k1::PublicKey::from_slice(&bytes).context("invalid pubkey bytes")?;
    Ok(bitcoin::PublicKey::new(pk))
}

fn parse_bitcoin_network(s: &str) -> anyhow::Result<bitcoin::Network> {
    Ok(match s.to_lowercase().as_str() {
        "bitcoin" | "mainnet" => bitcoin::Network::Bitcoin,
        "testnet" | "testnet3" => bitcoin::Network::Testnet,
        "regtest" => bitcoin::Network::Regtest,
        "signet" | "mutinynet" => bitcoin::Network::Signet,
        other => anyhow::bail!("unknown native network: {other}"),
    })
}
