use lazy_static::lazy_static;
use std::error;
use std::str::FromStr;
use web3::contract::tokens::Tokenize;
use web3::contract::Contract;
use web3::transports::Http;
use web3::types::{Address, U256};
use web3::{Transport, Web3};

pub const ERC20_TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
pub const ERC20_APPROVE_SELECTOR: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];

lazy_static! {
    pub static ref DUMMY_RPC_PROVIDER: Web3<Http> = {
        let transport = web3::transports::Http::new("http://noconn").unwrap();
        Web3::new(transport)
    };
    pub static ref ERC20_CONTRACT_TEMPLATE: Contract<Http> =
        { prepare_contract_template(include_bytes!("../contracts/ierc20.json")).unwrap() };
}

pub fn prepare_contract_template(json_abi: &[u8]) -> Result<Contract<Http>, Box<dyn error::Error>> {
    let contract = Contract::from_json(
        DUMMY_RPC_PROVIDER.eth(),
        Address::from_str("0x0000000000000000000000000000000000000000").unwrap(),
        json_abi,
    )?;

    Ok(contract)
}

pub fn contract_encode<P, T>(
    contract: &Contract<T>,
    func: &str,
    params: P,
) -> Result<Vec<u8>, web3::ethabi::Error>
where
    P: Tokenize,
    T: Transport,
{
    contract
        .abi()
        .function(func)
        .and_then(|function| function.encode_input(&params.into_tokens()))
}

pub fn encode_erc20_transfer(
    recipient: Address,
    amount: U256,
) -> Result<Vec<u8>, web3::ethabi::Error> {
    contract_encode(&ERC20_CONTRACT_TEMPLATE, "transfer", (recipient, amount))
}

/// Recognize an ERC20 transfer call and extract (recipient, amount).
/// Returns None for anything that is not a well-formed transfer call.
pub fn decode_erc20_transfer(call_data: &[u8]) -> Option<(Address, U256)> {
    if call_data.len() < 4 || call_data[0..4] != ERC20_TRANSFER_SELECTOR {
        return None;
    }
    let function = ERC20_CONTRACT_TEMPLATE.abi().function("transfer").ok()?;
    let tokens = function.decode_input(&call_data[4..]).ok()?;
    let recipient = tokens.first()?.clone().into_address()?;
    let amount = tokens.get(1)?.clone().into_uint()?;
    Some((recipient, amount))
}

pub fn is_erc20_approve(call_data: &[u8]) -> bool {
    call_data.len() >= 4 && call_data[0..4] == ERC20_APPROVE_SELECTOR
}
