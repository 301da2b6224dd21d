use anyhow::{Context as _, Result};

use ln_reverse_swap::swap::store::{SqliteSwapStore, is_constraint_violation};
use ln_reverse_swap::swap::{SwapRecord, SwapStatus};

fn sample_swap(swap_id: &str, hash_byte: &str, status: SwapStatus) -> SwapRecord {
    SwapRecord {
        swap_id: swap_id.to_string(),
        status,
        created_at: 1_700_000_000,
        updated_at: 1_700_000_000,
        preimage_hash: hash_byte.repeat(32),
        claim_public_key: format!("02{}", "11".repeat(32)),
        claim_address: format!("claim_address:{swap_id}"),
        invoice_amount_sat: 50_000,
        invoice: format!("invoice:{swap_id}"),
        invoice_paid: false,
        lockup_address: format!("lockup_address:{swap_id}"),
        lockup_txid: None,
        lockup_amount_sat: None,
        timeout_block_height: 2_440,
        claim_txid: None,
        claimed_at: None,
        preimage: None,
    }
}

#[test]
fn sqlite_store_insert_get_update_list() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let path = dir.path().join("swap_store.sqlite3");

    let mut store = SqliteSwapStore::open(path).context("open sqlite store")?;

    let a = sample_swap("swap-a", "aa", SwapStatus::Pending);
    store.insert_swap(&a).context("insert swap-a")?;

    let got = store
        .get_swap("swap-a")
        .context("get swap-a")?
        .context("swap-a missing")?;
    assert_eq!(got.swap_id, "swap-a");
    assert_eq!(got.status, SwapStatus::Pending);
    assert_eq!(got.preimage_hash, "aa".repeat(32));
    assert_eq!(got.invoice_amount_sat, 50_000);
    assert_eq!(got.timeout_block_height, 2_440);
    assert!(!got.invoice_paid);
    assert_eq!(got.lockup_txid, None);
    assert_eq!(got.preimage, None);

    store
        .set_invoice_paid("swap-a")
        .context("set swap-a invoice paid")?;
    let got = store
        .get_swap("swap-a")
        .context("get swap-a after invoice paid")?
        .context("swap-a missing")?;
    assert_eq!(got.status, SwapStatus::InvoicePaid);
    assert!(got.invoice_paid);
    assert!(got.updated_at >= got.created_at);

    store
        .set_locked("swap-a", "txid-lockup", 49_750)
        .context("set swap-a locked")?;
    let got = store
        .get_swap("swap-a")
        .context("get swap-a after lockup")?
        .context("swap-a missing")?;
    assert_eq!(got.status, SwapStatus::Locked);
    assert_eq!(got.lockup_txid.as_deref(), Some("txid-lockup"));
    assert_eq!(got.lockup_amount_sat, Some(49_750));
    assert_eq!(got.preimage, None);

    let mut b = sample_swap("swap-b", "bb", SwapStatus::Pending);
    b.created_at = 1_700_000_100;
    b.updated_at = 1_700_000_100;
    store.insert_swap(&b).context("insert swap-b")?;

    // Newest first.
    let all = store.list_swaps().context("list swaps")?;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].swap_id, "swap-b");
    assert_eq!(all[1].swap_id, "swap-a");

    let locked = store
        .list_swaps_by_status(SwapStatus::Locked)
        .context("list locked swaps")?;
    assert_eq!(locked.len(), 1);
    assert_eq!(locked[0].swap_id, "swap-a");

    let by_hash = store
        .get_swap_by_preimage_hash(&"bb".repeat(32))
        .context("get swap by preimage hash")?
        .context("swap-b missing by hash")?;
    assert_eq!(by_hash.swap_id, "swap-b");
    assert!(
        store
            .get_swap_by_preimage_hash(&"cc".repeat(32))
            .context("get unknown hash")?
            .is_none()
    );

    Ok(())
}

#[test]
fn preimage_is_only_written_on_claim() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let mut store =
        SqliteSwapStore::open(dir.path().join("swap_store.sqlite3")).context("open sqlite store")?;

    let record = sample_swap("swap-a", "aa", SwapStatus::Pending);
    store.insert_swap(&record).context("insert swap-a")?;
    store.set_invoice_paid("swap-a")?;
    store.set_locked("swap-a", "txid-lockup", 49_750)?;

    let got = store.get_swap("swap-a")?.context("swap-a missing")?;
    assert_eq!(got.preimage, None, "no preimage before the claim");

    store
        .set_claimed("swap-a", "txid-claim", 1_700_000_200, &"dd".repeat(32))
        .context("set swap-a claimed")?;

    let got = store.get_swap("swap-a")?.context("swap-a missing")?;
    assert_eq!(got.status, SwapStatus::Claimed);
    assert_eq!(got.claim_txid.as_deref(), Some("txid-claim"));
    assert_eq!(got.claimed_at, Some(1_700_000_200));
    assert_eq!(got.preimage.as_deref(), Some("dd".repeat(32).as_str()));

    Ok(())
}

#[test]
fn duplicate_preimage_hash_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let mut store =
        SqliteSwapStore::open(dir.path().join("swap_store.sqlite3")).context("open sqlite store")?;

    store.insert_swap(&sample_swap("swap-a", "aa", SwapStatus::Pending))?;

    let err = store
        .insert_swap(&sample_swap("swap-b", "aa", SwapStatus::Pending))
        .expect_err("duplicate preimage hash must not insert");
    assert!(format!("{err:#}").contains("swap-b"));
    assert!(is_constraint_violation(&err));

    // Other store failures are not constraint violations.
    let err = store
        .update_status("missing", SwapStatus::Failed)
        .expect_err("unknown swap must not update");
    assert!(!is_constraint_violation(&err));

    assert_eq!(store.list_swaps()?.len(), 1);
    Ok(())
}

#[test]
fn updates_to_unknown_swaps_fail() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let mut store =
        SqliteSwapStore::open(dir.path().join("swap_store.sqlite3")).context("open sqlite store")?;

    let err = store
        .update_status("missing", SwapStatus::Failed)
        .expect_err("unknown swap must not update");
    assert!(err.to_string().contains("swap not found"));

    let err = store
        .set_claimed("missing", "txid", 0, &"dd".repeat(32))
        .expect_err("unknown swap must not claim");
    assert!(err.to_string().contains("swap not found"));

    Ok(())
}

#[test]
fn reopen_preserves_rows() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let path = dir.path().join("swap_store.sqlite3");

    {
        let mut store = SqliteSwapStore::open(path.clone()).context("open sqlite store")?;
        store.insert_swap(&sample_swap("swap-a", "aa", SwapStatus::Locked))?;
    }

    let store = SqliteSwapStore::open(path).context("reopen sqlite store")?;
    let got = store.get_swap("swap-a")?.context("swap-a missing")?;
    assert_eq!(got.status, SwapStatus::Locked);
    Ok(())
}
