use std::{collections::HashSet, fs, path::Path};

use data_pipeline::{
    Dataset, PipelineConfig, PipelineErr, Producer,
    constants::{EVAL_GROUP_SIZE, SYNTHETIC_BATCHES_PER_EPOCH},
    instantiate_producer, preprocessing,
};

/// Writes an ml-1m style ratings file: 4 users with 20 to 23 ratings over 30 items, plus a
/// user with too few ratings.
fn write_ratings(data_dir: &Path) {
    let dir = Dataset::Ml1m.dir(data_dir);
    fs::create_dir_all(&dir).unwrap();

    let mut lines = String::new();
    for user in 1..=4u32 {
        for k in 0..(19 + user) {
            let item = 1 + (k + 3 * user) % 30;
            lines.push_str(&format!("{user}::{item}::4::{}\n", 1000 + k));
        }
    }
    lines.push_str("9::1::5::1\n9::2::5::2\n");

    fs::write(dir.join("ratings.dat"), lines).unwrap();
}

fn config(data_dir: &Path, use_subprocess: bool) -> PipelineConfig {
    PipelineConfig {
        dataset: Dataset::Ml1m,
        data_dir: data_dir.to_path_buf(),
        cache_id: 42,
        download_if_missing: false,
        use_synthetic_data: false,
        use_subprocess,
        num_neg: 4,
        batch_size: 32,
        eval_batch_size: EVAL_GROUP_SIZE,
        batches_per_step: 2,
        train_epochs: 2,
        seed: Some(3),
        hash_pipeline: true,
        match_mlperf: false,
    }
}

/// Each user's positives, keyed by dense ids.
fn positives(data_dir: &Path) -> Vec<HashSet<u32>> {
    let path = preprocessing::cache_path(Dataset::Ml1m, data_dir, 42);
    let index = preprocessing::RatingIndex::load(&path).unwrap();

    (0..index.num_users())
        .map(|u| {
            let mut set: HashSet<u32> = index.train_positives(u).iter().copied().collect();
            set.insert(index.test_positive(u));
            set
        })
        .collect()
}

fn run_producer(use_subprocess: bool) {
    let dir = tempfile::tempdir().unwrap();
    write_ratings(dir.path());

    let mut producer = instantiate_producer(&config(dir.path(), use_subprocess)).unwrap();
    assert_eq!(producer.num_users(), 4);
    assert_eq!(producer.num_items(), 30);

    // 19 + 20 + 21 + 22 training positives, 5 entries each, 32 per batch, rounded to 2.
    let entries: usize = (19 + 20 + 21 + 22) * 5;
    assert_eq!(
        producer.train_batches_per_epoch(),
        entries.div_ceil(32).next_multiple_of(2)
    );
    assert_eq!(producer.eval_batches_per_epoch(), 4);

    producer.start().unwrap();
    let positives = positives(dir.path());

    let mut batches = 0;
    let mut valid = 0;
    {
        let mut input = producer.train_input().unwrap();
        while let Some(batch) = input.next_batch().unwrap() {
            batches += 1;
            valid += batch.valid();

            for i in 0..batch.len() {
                if batch.weights[i] == 0.0 {
                    continue;
                }

                let user = batch.users[i] as usize;
                let rated = positives[user].contains(&batch.items[i]);
                assert_eq!(rated, batch.labels[i] == 1.0);
            }
        }
    }

    assert_eq!(batches, 2 * producer.train_batches_per_epoch());
    assert_eq!(valid, 2 * entries);

    for _ in 0..2 {
        let mut eval = producer.eval_input().unwrap();
        let mut groups = 0;
        while let Some(batch) = eval.next_batch().unwrap() {
            assert_eq!(batch.len(), EVAL_GROUP_SIZE);
            let user = batch.users[EVAL_GROUP_SIZE - 1] as usize;
            assert!(positives[user].contains(&batch.items[EVAL_GROUP_SIZE - 1]));
            groups += 1;
        }
        assert_eq!(groups, 4);
    }

    producer.stop_loop();
    producer.join().unwrap();
}

#[test]
fn background_producer_over_a_tiny_dataset() {
    run_producer(true);
}

#[test]
fn inline_producer_over_a_tiny_dataset() {
    run_producer(false);
}

#[test]
fn missing_ratings_fail_before_starting() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), true);
    config.download_if_missing = true;

    match instantiate_producer(&config) {
        Err(PipelineErr::MissingDataset { url, .. }) => {
            assert_eq!(url, Some(Dataset::Ml1m.url()));
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("expected a missing dataset error"),
    }
}

#[test]
fn synthetic_producers_need_no_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), true);
    config.use_synthetic_data = true;
    config.batches_per_step = 1;

    let mut producer = instantiate_producer(&config).unwrap();
    assert_eq!(producer.num_users(), 6040);
    assert_eq!(producer.num_items(), 3706);
    assert_eq!(producer.train_batches_per_epoch(), SYNTHETIC_BATCHES_PER_EPOCH);

    producer.start().unwrap();
    assert!(producer.train_input().unwrap().next_batch().unwrap().is_some());

    producer.stop_loop();
    producer.join().unwrap();
}

#[test]
fn eval_batch_sizes_must_hold_whole_groups() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), true);
    config.eval_batch_size = 1500;

    assert!(matches!(
        instantiate_producer(&config),
        Err(PipelineErr::InvalidConfig(_))
    ));
}
