use alloy_primitives::{address, b256, Address, Bytes, B256, U256};
use futures::{pin_mut, StreamExt};

use emberlog_core::factory::{ChildAddressLocation, Factory};
use emberlog_core::filter::{AddressFilter, LogFilterCriteria, TopicFilter};
use emberlog_core::interval::BlockInterval;
use emberlog_core::models::{Block, Log, Transaction, TransactionData};
use emberlog_core::source::{FactorySource, LogFilterSource};
use emberlog_store::{
    ContractReadResult, EventFilter, EventPage, EventStore, EventStoreError, EventStoreOptions,
};

async fn new_test_store() -> EventStore {
    EventStore::new(EventStoreOptions::default())
        .await
        .expect("store opens")
}

fn block_hash(number: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[0] = 0xb1;
    bytes[24..].copy_from_slice(&number.to_be_bytes());
    B256::from(bytes)
}

fn transaction_hash(seed: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[0] = 0x71;
    bytes[24..].copy_from_slice(&seed.to_be_bytes());
    B256::from(bytes)
}

fn new_test_block(number: u64) -> Block {
    Block {
        hash: block_hash(number),
        number: U256::from(number),
        timestamp: U256::from(1_000 + number * 12),
        parent_hash: block_hash(number.saturating_sub(1)),
        base_fee_per_gas: Some(U256::from(7)),
        difficulty: U256::ZERO,
        extra_data: Bytes::new(),
        gas_limit: U256::from(30_000_000u64),
        gas_used: U256::from(21_000u64),
        logs_bloom: Bytes::new(),
        miner: Address::repeat_byte(0xdd),
        mix_hash: B256::ZERO,
        nonce: 0,
        receipts_root: B256::repeat_byte(0xcc),
        sha3_uncles: B256::ZERO,
        size: U256::from(512u64),
        state_root: B256::repeat_byte(0xaa),
        total_difficulty: U256::ZERO,
        transactions_root: B256::repeat_byte(0xbb),
    }
}

fn new_test_transaction(block: &Block, index: u64, seed: u64) -> Transaction {
    Transaction {
        hash: transaction_hash(seed),
        block_hash: block.hash,
        block_number: block.number,
        transaction_index: index,
        from: Address::repeat_byte(0x01),
        to: Some(Address::repeat_byte(0x02)),
        input: Bytes::new(),
        value: U256::from(100u64),
        nonce: seed,
        gas: U256::from(21_000u64),
        v: U256::ZERO,
        r: U256::ZERO,
        s: U256::ZERO,
        data: TransactionData::Eip1559 {
            max_fee_per_gas: U256::from(10u64),
            max_priority_fee_per_gas: U256::from(1u64),
            access_list: Vec::new(),
        },
    }
}

fn new_test_log(
    block: &Block,
    transaction: &Transaction,
    log_index: u64,
    address: Address,
    topics: Vec<B256>,
) -> Log {
    Log {
        block_hash: block.hash,
        block_number: block.number,
        log_index,
        transaction_hash: transaction.hash,
        transaction_index: transaction.transaction_index,
        address,
        topics,
        data: Bytes::new(),
        removed: false,
    }
}

fn interval(start: u64, end: u64) -> BlockInterval {
    BlockInterval::new(U256::from(start), U256::from(end))
}

async fn collect_pages<S>(stream: S) -> Vec<EventPage>
where
    S: futures::Stream<Item = error_stack::Result<EventPage, EventStoreError>>,
{
    pin_mut!(stream);
    let mut pages = Vec::new();
    while let Some(page) = stream.next().await {
        pages.push(page.expect("page"));
    }
    pages
}

const USDC: Address = address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");

// ---------------------------------------------------------------- intervals

#[tokio::test]
async fn test_log_filter_intervals_merge_on_insert() {
    let store = new_test_store().await;
    let criteria = LogFilterCriteria::new(AddressFilter::exact(USDC));

    store
        .insert_log_filter_interval(
            1,
            criteria.clone(),
            new_test_block(15495110),
            vec![],
            vec![],
            interval(15495110, 15495110),
        )
        .await
        .unwrap();
    store
        .insert_log_filter_interval(
            1,
            criteria.clone(),
            new_test_block(15495112),
            vec![],
            vec![],
            interval(15495112, 15495112),
        )
        .await
        .unwrap();

    let coverage = store
        .get_log_filter_intervals(1, criteria.clone())
        .await
        .unwrap();
    assert_eq!(
        coverage,
        vec![interval(15495110, 15495110), interval(15495112, 15495112)]
    );

    // Filling the gap coalesces the three observations into one range.
    store
        .insert_log_filter_interval(
            1,
            criteria.clone(),
            new_test_block(15495111),
            vec![],
            vec![],
            interval(15495111, 15495111),
        )
        .await
        .unwrap();

    let coverage = store.get_log_filter_intervals(1, criteria).await.unwrap();
    assert_eq!(coverage, vec![interval(15495110, 15495112)]);
}

#[tokio::test]
async fn test_concurrent_interval_inserts_coalesce() {
    let store = new_test_store().await;
    let criteria = LogFilterCriteria::new(AddressFilter::exact(USDC));

    let (a, b, c) = tokio::join!(
        store.insert_log_filter_interval(
            1,
            criteria.clone(),
            new_test_block(15495110),
            vec![],
            vec![],
            interval(15495110, 15495110),
        ),
        store.insert_log_filter_interval(
            1,
            criteria.clone(),
            new_test_block(15495111),
            vec![],
            vec![],
            interval(15495111, 15495111),
        ),
        store.insert_log_filter_interval(
            1,
            criteria.clone(),
            new_test_block(15495112),
            vec![],
            vec![],
            interval(15495112, 15495112),
        ),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    let coverage = store.get_log_filter_intervals(1, criteria).await.unwrap();
    assert_eq!(coverage, vec![interval(15495110, 15495112)]);
}

#[tokio::test]
async fn test_narrower_filter_reuses_broader_coverage() {
    let store = new_test_store().await;

    let addr_a = address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
    let addr_b = address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
    let t_c = b256!("cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc");
    let t_d = b256!("dddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddd");
    let t_e = b256!("eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee");

    let broad = LogFilterCriteria::with_topics(
        AddressFilter::one_of([addr_a, addr_b]),
        vec![
            TopicFilter::one_of([t_c, t_d]),
            TopicFilter::Any,
            TopicFilter::exact(t_e),
        ],
    )
    .unwrap();

    store
        .insert_log_filter_interval(
            1,
            broad,
            new_test_block(100),
            vec![],
            vec![],
            interval(50, 100),
        )
        .await
        .unwrap();

    // Narrower on every slot: covered by the broad filter's intervals.
    let narrow = LogFilterCriteria::with_topics(
        AddressFilter::exact(addr_a),
        vec![
            TopicFilter::exact(t_c),
            TopicFilter::Any,
            TopicFilter::exact(t_e),
        ],
    )
    .unwrap();
    let coverage = store.get_log_filter_intervals(1, narrow).await.unwrap();
    assert_eq!(coverage, vec![interval(50, 100)]);

    // Wildcard address asks for more than the broad filter covers: empty.
    let widened = LogFilterCriteria::with_topics(
        AddressFilter::Any,
        vec![
            TopicFilter::exact(t_c),
            TopicFilter::Any,
            TopicFilter::exact(t_e),
        ],
    )
    .unwrap();
    let coverage = store.get_log_filter_intervals(1, widened).await.unwrap();
    assert!(coverage.is_empty());
}

#[tokio::test]
async fn test_coverage_is_per_chain() {
    let store = new_test_store().await;
    let criteria = LogFilterCriteria::new(AddressFilter::exact(USDC));

    store
        .insert_log_filter_interval(
            1,
            criteria.clone(),
            new_test_block(100),
            vec![],
            vec![],
            interval(1, 100),
        )
        .await
        .unwrap();

    let coverage = store.get_log_filter_intervals(10, criteria).await.unwrap();
    assert!(coverage.is_empty());
}

#[tokio::test]
async fn test_factory_log_filter_intervals() {
    let store = new_test_store().await;
    let factory = Factory {
        address: address!("00000000000000000000000000000000000000f1"),
        event_selector: b256!(
            "1111111111111111111111111111111111111111111111111111111111111111"
        ),
        child_address_location: ChildAddressLocation::Topic1,
    };

    store
        .insert_factory_log_filter_interval(
            1,
            factory.clone(),
            new_test_block(100),
            vec![],
            vec![],
            interval(50, 100),
        )
        .await
        .unwrap();
    store
        .insert_factory_log_filter_interval(
            1,
            factory.clone(),
            new_test_block(150),
            vec![],
            vec![],
            interval(101, 150),
        )
        .await
        .unwrap();

    let coverage = store
        .get_factory_log_filter_intervals(1, factory.clone())
        .await
        .unwrap();
    assert_eq!(coverage, vec![interval(50, 150)]);

    // A different child location is a different factory entirely.
    let other_location = Factory {
        child_address_location: ChildAddressLocation::Offset(32),
        ..factory
    };
    let coverage = store
        .get_factory_log_filter_intervals(1, other_location)
        .await
        .unwrap();
    assert!(coverage.is_empty());
}

// ---------------------------------------------------------------- factories

fn new_test_factory(location: ChildAddressLocation) -> Factory {
    Factory {
        address: address!("00000000000000000000000000000000000000f1"),
        event_selector: b256!(
            "1111111111111111111111111111111111111111111111111111111111111111"
        ),
        child_address_location: location,
    }
}

fn parent_log(
    factory: &Factory,
    block_number: u64,
    log_index: u64,
    child_topic: Option<Address>,
    data: Bytes,
) -> Log {
    let mut topics = vec![factory.event_selector];
    if let Some(child) = child_topic {
        topics.push(B256::left_padding_from(child.as_slice()));
    }
    Log {
        block_hash: block_hash(block_number),
        block_number: U256::from(block_number),
        log_index,
        transaction_hash: transaction_hash(block_number * 100 + log_index),
        transaction_index: 0,
        address: factory.address,
        topics,
        data,
        removed: false,
    }
}

async fn collect_child_pages(
    store: &EventStore,
    factory: &Factory,
    up_to_block: u64,
    page_size: Option<usize>,
) -> Vec<Vec<Address>> {
    let stream =
        store.get_factory_child_addresses(1, factory.clone(), U256::from(up_to_block), page_size);
    pin_mut!(stream);
    let mut pages = Vec::new();
    while let Some(page) = stream.next().await {
        pages.push(page.expect("child page"));
    }
    pages
}

#[tokio::test]
async fn test_child_addresses_from_topic() {
    let store = new_test_store().await;
    let factory = new_test_factory(ChildAddressLocation::Topic1);

    let child_one = address!("00000000000000000000000000000000000000c1");
    let child_three = address!("00000000000000000000000000000000000000c3");

    store
        .insert_factory_child_address_logs(
            1,
            vec![
                parent_log(&factory, 100, 0, Some(child_one), Bytes::new()),
                parent_log(&factory, 100, 1, Some(child_three), Bytes::new()),
            ],
        )
        .await
        .unwrap();

    let pages = collect_child_pages(&store, &factory, 150, None).await;
    let addresses: Vec<Address> = pages.into_iter().flatten().collect();
    assert_eq!(addresses, vec![child_one, child_three]);
}

#[tokio::test]
async fn test_child_addresses_from_data_offset() {
    let store = new_test_store().await;
    let factory = new_test_factory(ChildAddressLocation::Offset(32));

    let child_one = address!("00000000000000000000000000000000000000c1");
    let child_two = address!("00000000000000000000000000000000000000c2");

    let payload = |child: Address| {
        let mut data = vec![0u8; 64];
        data[32..].copy_from_slice(B256::left_padding_from(child.as_slice()).as_slice());
        Bytes::from(data)
    };

    store
        .insert_factory_child_address_logs(
            1,
            vec![
                parent_log(&factory, 100, 0, None, payload(child_one)),
                parent_log(&factory, 101, 0, None, payload(child_two)),
            ],
        )
        .await
        .unwrap();

    let pages = collect_child_pages(&store, &factory, 150, None).await;
    let addresses: Vec<Address> = pages.into_iter().flatten().collect();
    assert_eq!(addresses, vec![child_one, child_two]);
}

#[tokio::test]
async fn test_child_addresses_respect_upper_bound_and_page_size() {
    let store = new_test_store().await;
    let factory = new_test_factory(ChildAddressLocation::Topic1);

    let children: Vec<Address> = (1..=5u8)
        .map(|index| Address::repeat_byte(0xc0 | index))
        .collect();
    let logs = children
        .iter()
        .enumerate()
        .map(|(index, child)| {
            parent_log(&factory, 100 + index as u64, 0, Some(*child), Bytes::new())
        })
        .collect();
    store
        .insert_factory_child_address_logs(1, logs)
        .await
        .unwrap();

    // The child announced at block 104 sits past the bound.
    let pages = collect_child_pages(&store, &factory, 103, Some(2)).await;
    assert!(pages.iter().all(|page| !page.is_empty()));
    assert_eq!(pages.len(), 2);

    let addresses: Vec<Address> = pages.into_iter().flatten().collect();
    assert_eq!(addresses, children[..4].to_vec());
}

#[tokio::test]
async fn test_child_addresses_empty_factory_terminates() {
    let store = new_test_store().await;
    let factory = new_test_factory(ChildAddressLocation::Topic1);

    let pages = collect_child_pages(&store, &factory, 1_000_000, None).await;
    assert!(pages.is_empty());
}

// ------------------------------------------------------------- event replay

const TRANSFER: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");
const APPROVAL: B256 =
    b256!("8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925");

/// Two blocks of transfer/approval traffic: three transfers, one approval.
async fn seed_transfer_traffic(store: &EventStore) -> Vec<Log> {
    let block_one = new_test_block(15495110);
    let tx_one = new_test_transaction(&block_one, 0, 1);
    let tx_two = new_test_transaction(&block_one, 1, 2);
    let log_a = new_test_log(&block_one, &tx_one, 0, USDC, vec![TRANSFER, B256::ZERO]);
    let log_b = new_test_log(&block_one, &tx_two, 1, USDC, vec![APPROVAL, B256::ZERO]);

    let block_two = new_test_block(15495111);
    let tx_three = new_test_transaction(&block_two, 0, 3);
    let log_c = new_test_log(&block_two, &tx_three, 0, USDC, vec![TRANSFER, B256::ZERO]);
    let log_d = new_test_log(
        &block_two,
        &tx_three,
        1,
        Address::repeat_byte(0x77),
        vec![TRANSFER, B256::ZERO],
    );

    store
        .insert_log_filter_interval(
            1,
            LogFilterCriteria::default(),
            block_one,
            vec![tx_one, tx_two],
            vec![log_a.clone(), log_b.clone()],
            interval(15495110, 15495110),
        )
        .await
        .unwrap();
    store
        .insert_log_filter_interval(
            1,
            LogFilterCriteria::default(),
            block_two,
            vec![tx_three],
            vec![log_c.clone(), log_d.clone()],
            interval(15495111, 15495111),
        )
        .await
        .unwrap();

    vec![log_a, log_b, log_c, log_d]
}

fn single_topic_source(name: &str, topic0: B256) -> LogFilterSource {
    LogFilterSource {
        name: name.to_string(),
        chain_id: 1,
        criteria: LogFilterCriteria::with_topics(
            AddressFilter::Any,
            vec![TopicFilter::exact(topic0)],
        )
        .unwrap(),
        from_block: None,
        include_event_selectors: None,
    }
}

#[tokio::test]
async fn test_log_events_single_topic_filter() {
    let store = new_test_store().await;
    seed_transfer_traffic(&store).await;

    let pages = collect_pages(store.get_log_events(EventFilter {
        log_filters: vec![single_topic_source("singleTopic", TRANSFER)],
        ..Default::default()
    }))
    .await;

    let events: Vec<_> = pages.into_iter().flat_map(|page| page.events).collect();
    assert_eq!(events.len(), 3);
    for event in &events {
        assert_eq!(event.source_name, "singleTopic");
        assert_eq!(event.log.topics[0], TRANSFER);
        assert_eq!(event.log.block_hash, event.block.hash);
        assert_eq!(event.log.transaction_hash, event.transaction.hash);
        assert_eq!(
            event.log.id(),
            format!("{:#x}-{:#x}", event.log.block_hash, event.log.log_index)
        );
    }
}

#[tokio::test]
async fn test_log_events_are_replay_ordered() {
    let store = new_test_store().await;
    seed_transfer_traffic(&store).await;

    let pages = collect_pages(store.get_log_events(EventFilter {
        log_filters: vec![single_topic_source("all", TRANSFER)],
        page_size: 2,
        ..Default::default()
    }))
    .await;

    assert!(pages.len() >= 2);

    let events: Vec<_> = pages.into_iter().flat_map(|page| page.events).collect();
    let keys: Vec<_> = events
        .iter()
        .map(|event| {
            (
                event.block.timestamp,
                event.chain_id,
                event.block.number,
                event.log.log_index,
            )
        })
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

#[tokio::test]
async fn test_log_events_duplicate_per_matching_source() {
    let store = new_test_store().await;
    seed_transfer_traffic(&store).await;

    let pages = collect_pages(store.get_log_events(EventFilter {
        log_filters: vec![
            single_topic_source("first", TRANSFER),
            single_topic_source("second", TRANSFER),
        ],
        ..Default::default()
    }))
    .await;

    let events: Vec<_> = pages.into_iter().flat_map(|page| page.events).collect();
    assert_eq!(events.len(), 6);
    // Duplicates are adjacent, ordered by source position in the input.
    for pair in events.chunks(2) {
        assert_eq!(pair[0].source_name, "first");
        assert_eq!(pair[1].source_name, "second");
        assert_eq!(pair[0].log.id(), pair[1].log.id());
    }
}

#[tokio::test]
async fn test_log_events_empty_include_selectors_match_nothing() {
    let store = new_test_store().await;
    seed_transfer_traffic(&store).await;

    let mut source = single_topic_source("muted", TRANSFER);
    source.include_event_selectors = Some(Vec::new());

    let pages = collect_pages(store.get_log_events(EventFilter {
        log_filters: vec![source],
        ..Default::default()
    }))
    .await;

    assert!(pages.is_empty());
}

#[tokio::test]
async fn test_log_events_timestamp_window() {
    let store = new_test_store().await;
    let logs = seed_transfer_traffic(&store).await;

    // Window covering only the first block's timestamp.
    let first_timestamp = U256::from(1_000 + 15495110u64 * 12);
    let pages = collect_pages(store.get_log_events(EventFilter {
        from_timestamp: first_timestamp,
        to_timestamp: first_timestamp,
        log_filters: vec![single_topic_source("windowed", TRANSFER)],
        ..Default::default()
    }))
    .await;

    let events: Vec<_> = pages.into_iter().flat_map(|page| page.events).collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].log.id(), logs[0].id());
}

#[tokio::test]
async fn test_log_events_factory_source() {
    let store = new_test_store().await;
    let factory = new_test_factory(ChildAddressLocation::Topic1);
    let child = address!("00000000000000000000000000000000000000c1");

    // The child is announced at block 100.
    store
        .insert_factory_child_address_logs(
            1,
            vec![parent_log(&factory, 100, 0, Some(child), Bytes::new())],
        )
        .await
        .unwrap();

    // The child emits at block 120; an unrelated contract emits too. A log
    // from the same address at block 90 precedes the announcement.
    let early_block = new_test_block(90);
    let early_tx = new_test_transaction(&early_block, 0, 10);
    let early_log = new_test_log(&early_block, &early_tx, 0, child, vec![TRANSFER]);

    let block = new_test_block(120);
    let tx = new_test_transaction(&block, 0, 11);
    let child_log = new_test_log(&block, &tx, 0, child, vec![TRANSFER]);
    let other_log = new_test_log(&block, &tx, 1, Address::repeat_byte(0x99), vec![TRANSFER]);

    store
        .insert_log_filter_interval(
            1,
            LogFilterCriteria::default(),
            early_block,
            vec![early_tx],
            vec![early_log],
            interval(90, 90),
        )
        .await
        .unwrap();
    store
        .insert_log_filter_interval(
            1,
            LogFilterCriteria::default(),
            block,
            vec![tx],
            vec![child_log.clone(), other_log],
            interval(120, 120),
        )
        .await
        .unwrap();

    let pages = collect_pages(store.get_log_events(EventFilter {
        factories: vec![FactorySource::new("pair", 1, factory)],
        ..Default::default()
    }))
    .await;

    let events: Vec<_> = pages.into_iter().flat_map(|page| page.events).collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source_name, "pair");
    assert_eq!(events[0].log.id(), child_log.id());
}

// ----------------------------------------------------------------- realtime

#[tokio::test]
async fn test_delete_realtime_data_truncates_intervals() {
    let store = new_test_store().await;
    let criteria = LogFilterCriteria::new(AddressFilter::exact(USDC));

    store
        .insert_log_filter_interval(
            1,
            criteria.clone(),
            new_test_block(15495110),
            vec![],
            vec![],
            interval(15495110, 15495111),
        )
        .await
        .unwrap();

    store.delete_realtime_data(1, U256::from(15495111u64)).await.unwrap();

    let coverage = store.get_log_filter_intervals(1, criteria).await.unwrap();
    assert_eq!(coverage, vec![interval(15495110, 15495110)]);
}

#[tokio::test]
async fn test_delete_realtime_data_drops_artifacts() {
    let store = new_test_store().await;

    let kept_block = new_test_block(100);
    let kept_tx = new_test_transaction(&kept_block, 0, 1);
    let kept_log = new_test_log(&kept_block, &kept_tx, 0, USDC, vec![TRANSFER]);
    store
        .insert_realtime_block(1, kept_block, vec![kept_tx], vec![kept_log])
        .await
        .unwrap();

    let dropped_block = new_test_block(110);
    let dropped_tx = new_test_transaction(&dropped_block, 0, 2);
    let dropped_log = new_test_log(&dropped_block, &dropped_tx, 0, USDC, vec![TRANSFER]);
    store
        .insert_realtime_block(1, dropped_block, vec![dropped_tx], vec![dropped_log])
        .await
        .unwrap();

    store.delete_realtime_data(1, U256::from(110u64)).await.unwrap();

    let (blocks, transactions, logs) = store
        .db()
        .read(|conn| {
            let count = |table: &str| -> error_stack::Result<i64, EventStoreError> {
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .map_err(|error| {
                    error_stack::Report::new(EventStoreError::Query)
                        .attach_printable(error.to_string())
                })
            };
            Ok((count("blocks")?, count("transactions")?, count("logs")?))
        })
        .await
        .unwrap();

    assert_eq!(blocks, 1);
    assert_eq!(transactions, 1);
    assert_eq!(logs, 1);
}

#[tokio::test]
async fn test_insert_realtime_interval_covers_factory_both_ways() {
    let store = new_test_store().await;
    let factory = new_test_factory(ChildAddressLocation::Topic1);
    let criteria = LogFilterCriteria::new(AddressFilter::exact(USDC));

    store
        .insert_realtime_interval(
            1,
            vec![criteria.clone()],
            vec![factory.clone()],
            interval(200, 210),
        )
        .await
        .unwrap();

    let coverage = store.get_log_filter_intervals(1, criteria).await.unwrap();
    assert_eq!(coverage, vec![interval(200, 210)]);

    let coverage = store
        .get_factory_log_filter_intervals(1, factory.clone())
        .await
        .unwrap();
    assert_eq!(coverage, vec![interval(200, 210)]);

    // The parent emissions are covered through the normal log path too.
    let coverage = store
        .get_log_filter_intervals(1, factory.parent_criteria())
        .await
        .unwrap();
    assert_eq!(coverage, vec![interval(200, 210)]);
}

// ---------------------------------------------------------------- artifacts

#[tokio::test]
async fn test_artifact_inserts_are_idempotent() {
    let store = new_test_store().await;

    let block = new_test_block(100);
    let tx = new_test_transaction(&block, 0, 1);
    let log = new_test_log(&block, &tx, 0, USDC, vec![TRANSFER]);

    for _ in 0..2 {
        store
            .insert_realtime_block(1, block.clone(), vec![tx.clone()], vec![log.clone()])
            .await
            .unwrap();
    }

    let (blocks, transactions, logs) = store
        .db()
        .read(|conn| {
            let count = |table: &str| -> error_stack::Result<i64, EventStoreError> {
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .map_err(|error| {
                    error_stack::Report::new(EventStoreError::Query)
                        .attach_printable(error.to_string())
                })
            };
            Ok((count("blocks")?, count("transactions")?, count("logs")?))
        })
        .await
        .unwrap();

    assert_eq!((blocks, transactions, logs), (1, 1, 1));
}

#[tokio::test]
async fn test_transaction_requires_its_block() {
    let store = new_test_store().await;

    let block = new_test_block(100);
    let orphan = new_test_transaction(&block, 0, 1);

    // The block is never inserted, so the foreign key trips.
    let result = store
        .insert_realtime_block(1, new_test_block(101), vec![orphan], vec![])
        .await;

    assert_eq!(
        result.unwrap_err().current_context(),
        &EventStoreError::ReferentialViolation
    );
}

// --------------------------------------------------------------- read cache

#[tokio::test]
async fn test_contract_read_cache_miss_then_hit() {
    let store = new_test_store().await;

    let call_data = Bytes::from(vec![0x70, 0xa0, 0x82, 0x31]);
    let miss = store
        .get_contract_read_result(1, USDC, U256::from(100u64), call_data.clone())
        .await
        .unwrap();
    assert!(miss.is_none());

    let entry = ContractReadResult {
        chain_id: 1,
        address: USDC,
        block_number: U256::from(100u64),
        data: call_data.clone(),
        result: Bytes::from(vec![0x01]),
    };
    store.insert_contract_read_result(entry.clone()).await.unwrap();

    let hit = store
        .get_contract_read_result(1, USDC, U256::from(100u64), call_data.clone())
        .await
        .unwrap();
    assert_eq!(hit, Some(entry));

    // The same call pinned to a different block is a distinct entry.
    let other_block = store
        .get_contract_read_result(1, USDC, U256::from(101u64), call_data)
        .await
        .unwrap();
    assert!(other_block.is_none());
}

#[tokio::test]
async fn test_contract_read_cache_overwrites_on_conflict() {
    let store = new_test_store().await;

    let call_data = Bytes::from(vec![0x70, 0xa0, 0x82, 0x31]);
    let mut entry = ContractReadResult {
        chain_id: 1,
        address: USDC,
        block_number: U256::from(100u64),
        data: call_data.clone(),
        result: Bytes::from(vec![0x01]),
    };
    store.insert_contract_read_result(entry.clone()).await.unwrap();

    entry.result = Bytes::from(vec![0x02]);
    store.insert_contract_read_result(entry.clone()).await.unwrap();

    let hit = store
        .get_contract_read_result(1, USDC, U256::from(100u64), call_data)
        .await
        .unwrap();
    assert_eq!(hit.unwrap().result, Bytes::from(vec![0x02]));
}
