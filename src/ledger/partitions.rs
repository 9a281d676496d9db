/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `accounts`: acct:{account_id} -> Account (JSON)
/// - `jobs`: job:{job_id:020} -> Job (JSON)
/// - `account_jobs`: aj:{account_id}:{job_id:020} -> empty (index)
/// - `customers`: cust:{customer_id} -> account_id (string)
/// - `billing`: bill:{account_id}:{created_ms:016}:{record_id} -> BillingRecord (JSON)
/// - `metadata`: meta:{key} -> value
use super::models::JobId;

/// Encode an account key: acct:{account_id}
pub fn encode_account_key(account_id: &str) -> Vec<u8> {
    format!("acct:{}", account_id).into_bytes()
}

/// Encode a job key: job:{job_id:020}
///
/// Zero padding keeps lexicographic order equal to numeric order.
pub fn encode_job_key(job_id: JobId) -> Vec<u8> {
    format!("job:{:020}", job_id).into_bytes()
}

/// Encode an account/job index key: aj:{account_id}:{job_id:020}
pub fn encode_account_job_key(account_id: &str, job_id: JobId) -> Vec<u8> {
    format!("aj:{}:{:020}", account_id, job_id).into_bytes()
}

/// Encode the prefix of all index entries for one account: aj:{account_id}:
pub fn encode_account_job_prefix(account_id: &str) -> Vec<u8> {
    format!("aj:{}:", account_id).into_bytes()
}

/// Decode an account/job index key -> job_id
///
/// Account ids may contain ':' so the job id is taken from the last segment.
pub fn decode_account_job_key(key: &[u8]) -> Option<JobId> {
    let key_str = std::str::from_utf8(key).ok()?;
    let rest = key_str.strip_prefix("aj:")?;
    let (_, job_id) = rest.rsplit_once(':')?;
    job_id.parse().ok()
}

/// Encode a customer index key: cust:{customer_id}
pub fn encode_customer_key(customer_id: &str) -> Vec<u8> {
    format!("cust:{}", customer_id).into_bytes()
}

/// Encode a billing key: bill:{account_id}:{created_ms:016}:{record_id}
pub fn encode_billing_key(account_id: &str, created_ms: i64, record_id: &str) -> Vec<u8> {
    format!("bill:{}:{:016}:{}", account_id, created_ms.max(0), record_id).into_bytes()
}

/// Encode the prefix of all billing records for one account: bill:{account_id}:
pub fn encode_billing_prefix(account_id: &str) -> Vec<u8> {
    format!("bill:{}:", account_id).into_bytes()
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}
