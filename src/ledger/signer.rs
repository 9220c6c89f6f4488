//! Transaction signing for the operator account.
//!
//! Builds EIP-1559 transactions against the oracle contract with fixed gas
//! parameters and signs them locally. No fee estimation happens per call.

use anyhow::{Context, Result};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Eip1559TransactionRequest, H256, U256};
use ethers::utils::keccak256;
use secrecy::{ExposeSecret, SecretString};

use crate::types::{SignedTransaction, SubmitError, TransactionRequest};

/// Gas limit used for every operator transaction.
pub const DEFAULT_GAS_LIMIT: u64 = 10_000_000;

/// Fee parameters applied to every transaction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasSettings {
    pub gas_limit: u64,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_GAS_LIMIT,
            max_fee_per_gas: gwei(0.02),
            max_priority_fee_per_gas: gwei(0.01),
        }
    }
}

/// Convert a (possibly fractional) gwei amount to wei.
pub fn gwei(amount: f64) -> U256 {
    U256::from((amount * 1e9).round().max(0.0) as u64)
}

/// Signs transaction requests on behalf of the single operator account.
#[cfg_attr(test, mockall::automock)]
pub trait TransactionSigner: Send + Sync {
    /// Account whose nonce the signatures consume.
    fn address(&self) -> Address;

    fn sign(&self, request: &TransactionRequest) -> Result<SignedTransaction, SubmitError>;
}

/// Local private-key signer bound to one chain and one target contract.
pub struct LocalSigner {
    wallet: LocalWallet,
    contract: Address,
    gas: GasSettings,
}

impl LocalSigner {
    pub fn new(
        private_key: &SecretString,
        chain_id: u64,
        contract: Address,
        gas: GasSettings,
    ) -> Result<Self> {
        let key = private_key.expose_secret();
        let wallet = key
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .context("Invalid signer private key")?
            .with_chain_id(chain_id);

        Ok(Self {
            wallet,
            contract,
            gas,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.wallet.chain_id()
    }
}

impl TransactionSigner for LocalSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    fn sign(&self, request: &TransactionRequest) -> Result<SignedTransaction, SubmitError> {
        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .from(self.wallet.address())
            .to(self.contract)
            .value(request.value)
            .data(request.call.encode())
            .nonce(request.nonce)
            .gas(self.gas.gas_limit)
            .max_fee_per_gas(self.gas.max_fee_per_gas)
            .max_priority_fee_per_gas(self.gas.max_priority_fee_per_gas)
            .chain_id(self.wallet.chain_id())
            .into();

        let signature = self
            .wallet
            .sign_transaction_sync(&tx)
            .map_err(|e| SubmitError::Signing(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);
        let hash = H256::from(keccak256(&raw));

        Ok(SignedTransaction {
            raw,
            hash,
            nonce: request.nonce,
        })
    }
}
