use libwindrose::AttSet;
use libwindrose::Filter;
use libwindrose::Label;
use libwindrose::LabelBitset;
use libwindrose::SpaceKind;
use libwindrose::Windrose;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::collections::HashSet;

fn random_vec(rng: &mut StdRng, dim: usize) -> Vec<f32> {
  (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

#[test]
fn single_item_index() {
  let idx = Windrose::<i32>::open_fresh(1, 2, 4, 10, SpaceKind::L2, 4, 0, true).unwrap();
  idx.insert(7, &[1.0, 0.0], 3, false).unwrap();
  assert_eq!(idx.size(), 1);
  assert_eq!(idx.dimension(), 2);
  assert_eq!(idx.max_layer(), 0);

  let res = idx
    .search(&[0.0, 0.0], 1, 1, &Filter::range(0, 10))
    .unwrap();
  assert_eq!(res, vec![(1.0, 7)]);
}

#[test]
fn exact_recall_on_axis_vectors() {
  let idx = Windrose::<i32>::open_fresh(4, 2, 4, 16, SpaceKind::L2, 4, 10, true).unwrap();
  let items: [(Label, [f32; 2], i32); 4] = [
    (1, [1.0, 0.0], 1),
    (2, [0.0, 1.0], 2),
    (3, [-1.0, 0.0], 3),
    (4, [0.0, -1.0], 4),
  ];
  for (label, vec, att) in items {
    idx.insert(label, &vec, att, false).unwrap();
  }

  let res = idx
    .search(&[0.9, 0.1], 16, 2, &Filter::range(1, 4))
    .unwrap();
  assert_eq!(res.len(), 2);
  assert_eq!(res[0].1, 1);
  assert_eq!(res[1].1, 2);
  assert!(res[0].0 < res[1].0);
}

#[test]
fn range_filter_soundness() {
  let dim = 8;
  let n = 100;
  let mut rng = StdRng::seed_from_u64(40);
  let idx = Windrose::<i32>::open_fresh(n, dim, 8, 64, SpaceKind::L2, 4, 10, true).unwrap();

  let mut att_of = HashMap::new();
  for i in 0..n {
    let att = (i + 1) as i32;
    let label = (i as Label) * 3 + 1;
    idx.insert(label, &random_vec(&mut rng, dim), att, false).unwrap();
    att_of.insert(label, att);
  }

  for _ in 0..20 {
    let q = random_vec(&mut rng, dim);
    let res = idx.search(&q, 64, 5, &Filter::range(40, 60)).unwrap();
    assert_eq!(res.len(), 5);
    for (_, label) in res {
      let att = att_of[&label];
      assert!((40..=60).contains(&att), "label {label} has att {att}");
    }
  }
}

#[test]
fn set_filter_soundness() {
  let dim = 4;
  let n = 64;
  let mut rng = StdRng::seed_from_u64(41);
  let idx = Windrose::<i32>::open_fresh(n, dim, 8, 32, SpaceKind::L2, 4, 10, true).unwrap();
  for i in 0..n {
    idx
      .insert(i as Label, &random_vec(&mut rng, dim), (i % 10) as i32, false)
      .unwrap();
  }

  let allowed = AttSet::from_values(vec![2, 5, 7]);
  let filter = Filter::Set(allowed);
  let q = random_vec(&mut rng, dim);
  let res = idx.search(&q, 32, 8, &filter).unwrap();
  assert!(!res.is_empty());
  for (_, label) in res {
    let att = (label % 10) as i32;
    assert!([2, 5, 7].contains(&att));
  }
}

#[test]
fn bitset_filter_soundness() {
  let dim = 4;
  let n = 64;
  let mut rng = StdRng::seed_from_u64(42);
  let idx = Windrose::<i32>::open_fresh(n, dim, 8, 32, SpaceKind::L2, 4, 10, true).unwrap();
  for i in 0..n {
    idx
      .insert(i as Label, &random_vec(&mut rng, dim), i as i32, false)
      .unwrap();
  }

  let wanted: Vec<Label> = (0..n as Label).filter(|l| l % 3 == 0).collect();
  let filter = Filter::Bitset(LabelBitset::from_labels(n, wanted.iter().copied()));
  let q = random_vec(&mut rng, dim);
  let res = idx.search(&q, 32, 10, &filter).unwrap();
  assert!(!res.is_empty());
  for (_, label) in res {
    assert_eq!(label % 3, 0);
  }
}

#[test]
fn unfiltered_search_returns_results() {
  let dim = 4;
  let n = 32;
  let mut rng = StdRng::seed_from_u64(43);
  let idx = Windrose::<i32>::open_fresh(n, dim, 8, 32, SpaceKind::L2, 4, 10, true).unwrap();
  for i in 0..n {
    idx
      .insert(i as Label, &random_vec(&mut rng, dim), i as i32, false)
      .unwrap();
  }
  let res = idx
    .search(&random_vec(&mut rng, dim), 16, 4, &Filter::None)
    .unwrap();
  assert!(!res.is_empty());
  assert!(res.len() <= 4);
}

#[test]
fn inner_product_space_orders_by_dot_product() {
  let idx = Windrose::<i32>::open_fresh(3, 2, 4, 16, SpaceKind::Ip, 4, 10, true).unwrap();
  idx.insert(1, &[1.0, 0.0], 1, false).unwrap();
  idx.insert(2, &[0.0, 1.0], 2, false).unwrap();
  idx.insert(3, &[0.5, 0.5], 3, false).unwrap();

  let res = idx
    .search(&[1.0, 0.0], 16, 3, &Filter::range(1, 3))
    .unwrap();
  assert_eq!(res[0].1, 1);
  // ip distance is 1 - dot
  assert!((res[0].0 - 0.0).abs() < 1e-6);
}

#[test]
fn layer_promotion_preserves_lower_layer_edges() {
  let dim = 4;
  let n = 1025;
  let mut rng = StdRng::seed_from_u64(44);
  let idx = Windrose::<i64>::open_fresh(n, dim, 8, 48, SpaceKind::L2, 2, 10, true).unwrap();

  for i in 0..n - 1 {
    idx
      .insert(i as Label, &random_vec(&mut rng, dim), i as i64, false)
      .unwrap();
  }
  assert_eq!(idx.max_layer(), 9);

  // snapshot of the layer that is about to be copied upwards
  let snapshot: Vec<Vec<u32>> = (0..(n - 1) as u32)
    .map(|id| idx.neighbors(id, 9).unwrap())
    .collect();

  let last = (n - 1) as Label;
  idx
    .insert(last, &random_vec(&mut rng, dim), (n - 1) as i64, false)
    .unwrap();
  assert_eq!(idx.max_layer(), 10);

  for (id, old) in snapshot.iter().enumerate() {
    if old.is_empty() {
      continue;
    }
    let upper = idx.neighbors(id as u32, 10).unwrap();
    assert!(!upper.is_empty(), "node {id} lost its promoted list");
    let upper_set: HashSet<u32> = upper.iter().copied().collect();
    let is_superset = old.iter().all(|v| upper_set.contains(v));
    // the final insert may have re-pruned the list it back-edged into
    assert!(
      is_superset || upper_set.contains(&(last as u32)),
      "node {id} layer 10 is neither a superset nor re-pruned"
    );
  }

  idx.check_integrity().unwrap();
}

#[test]
fn recall_is_monotone_in_beam_width() {
  let dim = 8;
  let n = 400;
  let k = 10;
  let mut rng = StdRng::seed_from_u64(45);
  let idx = Windrose::<i32>::open_fresh(n, dim, 8, 48, SpaceKind::L2, 4, 10, true).unwrap();

  let mut data = Vec::new();
  for i in 0..n {
    let v = random_vec(&mut rng, dim);
    idx.insert(i as Label, &v, i as i32, false).unwrap();
    data.push(v);
  }

  let queries: Vec<Vec<f32>> = (0..50).map(|_| random_vec(&mut rng, dim)).collect();
  let filter = Filter::range(50, 349);

  let ground_truth: Vec<HashSet<Label>> = queries
    .iter()
    .map(|q| {
      let mut all: Vec<(f32, Label)> = (50..350)
        .map(|i| {
          let d: f32 = data[i]
            .iter()
            .zip(q.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
          (d, i as Label)
        })
        .collect();
      all.sort_by(|a, b| a.0.total_cmp(&b.0));
      all.truncate(k);
      all.into_iter().map(|(_, l)| l).collect()
    })
    .collect();

  let mean_recall = |ef: usize| -> f64 {
    let mut hit = 0usize;
    for (q, gt) in queries.iter().zip(&ground_truth) {
      let res = idx.search(q, ef, k, &filter).unwrap();
      hit += res.iter().filter(|(_, l)| gt.contains(l)).count();
    }
    hit as f64 / (queries.len() * k) as f64
  };

  let low = mean_recall(k);
  let high = mean_recall(300);
  assert!(
    high >= low - 1e-9,
    "recall degraded with a wider beam: {low} -> {high}"
  );
  assert!(high >= 0.9, "wide-beam recall too low: {high}");
}

#[test]
fn metrics_count_distances_and_hops() {
  let idx = Windrose::<i32>::open_fresh(8, 2, 4, 16, SpaceKind::L2, 4, 10, true).unwrap();
  for i in 0..8 {
    idx
      .insert(i as Label, &[i as f32, 0.0], i as i32, false)
      .unwrap();
  }
  let before = idx.metric_dist_comps();
  idx
    .search(&[0.0, 0.0], 8, 2, &Filter::range(0, 7))
    .unwrap();
  assert!(idx.metric_dist_comps() > before);
  assert!(idx.metric_hops() > 0);
}
