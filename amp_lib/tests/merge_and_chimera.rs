use amp_fastq::Read;
use amp_lib::sequence::revcomp;
use amp_lib::{
    denoise, dereplicate, merge_pairs, remove_bimeras, CancelToken, DenoisedReads, ErrorModel,
    MergedVariant, SequenceTable,
};
use amp_params::{ChimeraMethod, ChimeraParams, ColumnOrder, DenoiseParams, MergeParams};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

const BASES: &[u8] = b"ACGT";
const METHODS: [ChimeraMethod; 3] = [
    ChimeraMethod::Consensus,
    ChimeraMethod::PerSample,
    ChimeraMethod::Pooled,
];

fn random_seq(rng: &mut impl Rng, len: usize) -> Vec<u8> {
    (0..len).map(|_| BASES[rng.gen_range(0..4)]).collect()
}

fn variant(sequence: Vec<u8>, abundance: u64) -> MergedVariant {
    let len = sequence.len();
    MergedVariant {
        sequence,
        abundance,
        forward: 0,
        reverse: 0,
        overlap: len,
        mismatches: 0,
    }
}

fn chimera_params(method: ChimeraMethod) -> ChimeraParams {
    ChimeraParams {
        method,
        ..ChimeraParams::default()
    }
}

#[test]
fn bimera_of_two_abundant_parents_is_removed() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
    let a = random_seq(&mut rng, 400);
    let b = random_seq(&mut rng, 400);
    let chimera: Vec<u8> = a[..200].iter().chain(&b[200..]).copied().collect();
    let table = SequenceTable::build(
        &[(
            "S1".to_string(),
            vec![
                variant(a.clone(), 500),
                variant(b.clone(), 400),
                variant(chimera, 10),
            ],
        )],
        ColumnOrder::FirstSeen,
    );

    for method in METHODS {
        let (filtered, stats) = remove_bimeras(&table, &chimera_params(method));
        assert_eq!(filtered.sequences(), &[a.clone(), b.clone()]);
        assert_eq!(stats.input_sequences, 3);
        assert_eq!(stats.chimeric_sequences, 1);
        assert_eq!((stats.input_reads, stats.retained_reads), (910, 900));
        assert!((stats.retained_fraction() - 900.0 / 910.0).abs() < 1e-12);
    }
}

#[test]
fn consensus_needs_most_samples_to_agree() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
    let a = random_seq(&mut rng, 200);
    let b = random_seq(&mut rng, 200);
    let chimera: Vec<u8> = a[..120].iter().chain(&b[120..]).copied().collect();
    // The chimera is flagged in S1 only; in S2 its parents are too rare.
    let table = SequenceTable::build(
        &[
            (
                "S1".to_string(),
                vec![
                    variant(a.clone(), 300),
                    variant(b.clone(), 300),
                    variant(chimera.clone(), 20),
                ],
            ),
            (
                "S2".to_string(),
                vec![
                    variant(a.clone(), 10),
                    variant(b.clone(), 10),
                    variant(chimera.clone(), 40),
                ],
            ),
            ("S3".to_string(), vec![variant(a.clone(), 50), variant(chimera.clone(), 30)]),
        ],
        ColumnOrder::FirstSeen,
    );

    let (consensus, _) = remove_bimeras(&table, &chimera_params(ChimeraMethod::Consensus));
    assert_eq!(consensus.num_sequences(), 3);

    let (per_sample, stats) = remove_bimeras(&table, &chimera_params(ChimeraMethod::PerSample));
    assert_eq!(per_sample.num_sequences(), 3);
    assert_eq!(per_sample.row(0), vec![300, 300, 0]);
    assert_eq!(stats.chimeric_sequences, 0);
    assert_eq!(stats.retained_reads, stats.input_reads - 20);
}

fn table_strategy() -> impl Strategy<Value = Vec<Vec<(usize, u64)>>> {
    let cell = (0usize..4, 1u64..200);
    prop::collection::vec(prop::collection::vec(cell, 1..6), 1..4)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn most_abundant_sequence_is_never_removed(
        samples in table_strategy(),
        allow_one_off in any::<bool>(),
    ) {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        let left = [random_seq(&mut rng, 30), random_seq(&mut rng, 30)];
        let right = [random_seq(&mut rng, 30), random_seq(&mut rng, 30)];
        let seqs: Vec<Vec<u8>> = (0..4)
            .map(|i| left[i / 2].iter().chain(&right[i % 2]).copied().collect())
            .collect();
        let rows: Vec<(String, Vec<MergedVariant>)> = samples
            .iter()
            .enumerate()
            .map(|(i, cells)| {
                let variants = cells.iter().map(|&(s, n)| variant(seqs[s].clone(), n)).collect();
                (format!("S{i}"), variants)
            })
            .collect();
        let table = SequenceTable::build(&rows, ColumnOrder::FirstSeen);
        let totals = table.column_totals();
        let max = totals.iter().copied().max().unwrap_or(0);
        let top = totals.iter().position(|&t| t == max).unwrap();

        for method in METHODS {
            let params = ChimeraParams { allow_one_off, ..chimera_params(method) };
            let (filtered, stats) = remove_bimeras(&table, &params);
            prop_assert!(filtered.sequences().contains(&table.sequences()[top]));
            prop_assert!(stats.retained_reads <= stats.input_reads);
            prop_assert_eq!(filtered.num_samples(), table.num_samples());
        }
    }

    #[test]
    fn merged_length_is_mates_minus_overlap(
        seed in any::<u64>(),
        len in 80usize..200,
        fwd_frac in 0.5f64..1.0,
        extra in 12usize..60,
    ) {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let amplicon = random_seq(&mut rng, len);
        let fwd_len = ((len as f64 * fwd_frac) as usize).max(12);
        let rev_len = (len - fwd_len + extra).min(len);

        let fwd = [Read::new(amplicon[..fwd_len].to_vec(), vec![35; fwd_len])];
        let rev = [Read::new(revcomp(&amplicon[len - rev_len..]), vec![35; rev_len])];
        let (fwd_derep, rev_derep) = (dereplicate(&fwd), dereplicate(&rev));
        let model = ErrorModel::from_phred(41);
        let params = DenoiseParams::default();
        let fwd_result = denoise(&fwd_derep.uniques, &model, &params, &CancelToken::new());
        let rev_result = denoise(&rev_derep.uniques, &model, &params, &CancelToken::new());

        let (merged, stats) = merge_pairs(
            DenoisedReads { derep: &fwd_derep, denoised: &fwd_result },
            DenoisedReads { derep: &rev_derep, denoised: &rev_result },
            &MergeParams::default(),
        );
        prop_assert_eq!(stats.merged_pairs + stats.rejected_pairs, stats.input_pairs);
        // The true overlap is at least the minimum, so the pair always merges.
        prop_assert_eq!(merged.len(), 1);
        let m = &merged[0];
        prop_assert!(m.overlap >= 12);
        prop_assert_eq!(m.sequence.len(), fwd_len + rev_len - m.overlap);
    }
}
