use agent_tx_lib::err_custom_create;
use agent_tx_lib::error::{CustomError, ErrorBag, ExecutorError};
use std::path::PathBuf;
use std::str::FromStr;
use structopt::StructOpt;
use web3::types::{Address, U256};

#[derive(Debug, StructOpt)]
struct TransferOptions {
    #[structopt(long = "user-id", default_value = "cli")]
    user_id: String,

    #[structopt(long = "skill", default_value = "cli-transfer")]
    skill: String,

    #[structopt(
        long = "receivers",
        help = "Receiver address, or comma separated list of receivers"
    )]
    receivers: String,

    #[structopt(
        long = "amounts",
        help = "Amount in wei, or comma separated list of amounts"
    )]
    amounts: String,

    #[structopt(long = "chain-id", default_value = "1")]
    chain_id: i64,

    #[structopt(
        long = "token-addr",
        help = "Token address, if not set the chain's native currency is sent"
    )]
    token_addr: Option<String>,

    #[structopt(long = "plain-eth", help = "Set if you want to send the native currency")]
    plain_eth: bool,

    #[structopt(
        long = "mev-protect",
        help = "Route through the protected relay where supported"
    )]
    mev_protect: bool,

    #[structopt(
        long = "keep-running",
        help = "Keep the service alive after the transfers are processed"
    )]
    keep_running: bool,
}

#[derive(Debug, StructOpt)]
struct ImportContractsOptions {
    #[structopt(long = "chain-id", default_value = "1")]
    chain_id: i64,

    #[structopt(long = "file", help = "CSV file with address,action,note rows")]
    file: PathBuf,
}

#[derive(Debug, StructOpt)]
struct ShowTxOptions {
    #[structopt(long = "uid", help = "Transaction uid as returned on submission")]
    uid: String,
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "agent_tx_processor",
    about = "Transaction execution service for agent initiated transfers"
)]
enum CliOptions {
    /// Run the executor service with the HTTP API.
    #[structopt(name = "run")]
    Run,
    /// Queue transfers and process them.
    #[structopt(name = "transfer")]
    Transfer(TransferOptions),
    /// Load allow and deny list entries from a CSV file.
    #[structopt(name = "import-contracts")]
    ImportContracts(ImportContractsOptions),
    /// Print a transaction record with its status history.
    #[structopt(name = "show-tx")]
    ShowTx(ShowTxOptions),
}

pub struct ValidatedTransfer {
    pub user_id: String,
    pub skill: String,
    pub receivers: Vec<Address>,
    pub amounts: Vec<U256>,
    pub chain_id: i64,
    pub token_addr: Option<Address>,
    pub use_mev_protection: bool,
    pub keep_running: bool,
}

pub enum ValidatedCommand {
    Run,
    Transfer(ValidatedTransfer),
    ImportContracts { chain_id: i64, file: PathBuf },
    ShowTx { uid: String },
}

pub fn validated_cli() -> Result<ValidatedCommand, ExecutorError> {
    let opt: CliOptions = CliOptions::from_args();
    match opt {
        CliOptions::Run => Ok(ValidatedCommand::Run),
        CliOptions::Transfer(transfer_options) => {
            let split_pattern = [',', ';'];
            let mut amounts = Vec::<U256>::new();
            for amount in transfer_options.amounts.split(&split_pattern) {
                let amount = U256::from_dec_str(amount).map_err(|_| {
                    err_custom_create!("Invalid amount when parsing input: {}", amount)
                })?;
                amounts.push(amount);
            }

            let mut receivers = Vec::<Address>::new();
            for receiver in transfer_options.receivers.split(&split_pattern) {
                let receiver = Address::from_str(receiver).map_err(|_| {
                    err_custom_create!("Invalid receiver when parsing input: {}", receiver)
                })?;
                receivers.push(receiver);
            }

            if receivers.len() != amounts.len() {
                return Err(err_custom_create!(
                    "Receivers count and amount count don't match: {} != {}",
                    receivers.len(),
                    amounts.len()
                ));
            }
            if receivers.is_empty() {
                return Err(err_custom_create!("No receivers specified"));
            }
            if transfer_options.plain_eth && transfer_options.token_addr.is_some() {
                return Err(err_custom_create!(
                    "Can't specify both plain-eth and token-addr"
                ));
            }
            if !transfer_options.plain_eth && transfer_options.token_addr.is_none() {
                return Err(err_custom_create!(
                    "Specify token-addr or set plain-eth for a native transfer"
                ));
            }

            let token_addr = transfer_options
                .token_addr
                .map(|s| {
                    Address::from_str(&s).map_err(|_| {
                        err_custom_create!("Invalid token address when parsing input: {}", s)
                    })
                })
                .transpose()?;

            Ok(ValidatedCommand::Transfer(ValidatedTransfer {
                user_id: transfer_options.user_id,
                skill: transfer_options.skill,
                receivers,
                amounts,
                chain_id: transfer_options.chain_id,
                token_addr,
                use_mev_protection: transfer_options.mev_protect,
                keep_running: transfer_options.keep_running,
            }))
        }
        CliOptions::ImportContracts(import_options) => Ok(ValidatedCommand::ImportContracts {
            chain_id: import_options.chain_id,
            file: import_options.file,
        }),
        CliOptions::ShowTx(show_options) => Ok(ValidatedCommand::ShowTx {
            uid: show_options.uid,
        }),
    }
}
