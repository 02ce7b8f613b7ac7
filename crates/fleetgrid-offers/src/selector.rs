//! Offer matching and smallest-first selection.
//!
//! Evaluates offers against job requirements:
//! - **Matching**: CPU, memory, spot flag, disk, price cap, and GPUs
//! - **Ordering**: smallest instance first by `(total GPU memory, CPUs, memory)`
//!
//! Everything here is pure and deterministic. Sorting is stable, so offers
//! with equal keys keep their input order.

use fleetgrid_state::{GpuRequirement, InstanceOffer, InstanceResources, Requirements};

/// Sort key: smaller instances first.
pub fn selection_key(offer: &InstanceOffer) -> (u64, u32, u64) {
    let res = &offer.instance.resources;
    (res.total_gpu_memory_mib(), res.cpus, res.memory_mib)
}

/// Stable ascending sort by [`selection_key`].
pub fn sort_offers(offers: &mut [InstanceOffer]) {
    offers.sort_by_key(selection_key);
}

/// Whether an offer satisfies every clause of the requirements.
pub fn offer_matches(offer: &InstanceOffer, req: &Requirements) -> bool {
    let res = &offer.instance.resources;

    if res.cpus < req.cpus || res.memory_mib < req.memory_mib {
        return false;
    }

    if let Some(spot) = req.spot
        && res.spot != spot
    {
        return false;
    }

    if let Some(disk) = req.disk_size_mib
        && res.disk_size_mib < disk
    {
        return false;
    }

    if let Some(max_price) = req.max_price
        && offer.price > max_price
    {
        return false;
    }

    match &req.gpu {
        Some(gpu) => gpus_match(res, gpu),
        None => true,
    }
}

/// Enough GPUs with an acceptable name and enough memory each.
fn gpus_match(res: &InstanceResources, req: &GpuRequirement) -> bool {
    let suitable = res
        .gpus
        .iter()
        .filter(|g| {
            req.names.is_empty() || req.names.iter().any(|n| n.eq_ignore_ascii_case(&g.name))
        })
        .filter(|g| req.memory_mib.is_none_or(|min| g.memory_mib >= min))
        .count();
    suitable >= req.count() as usize
}

/// Matching offers, smallest first.
pub fn filter_offers(mut offers: Vec<InstanceOffer>, req: &Requirements) -> Vec<InstanceOffer> {
    sort_offers(&mut offers);
    offers.retain(|o| offer_matches(o, req));
    offers
}

/// The smallest offer satisfying the requirements, or `None` when nothing
/// qualifies (which callers treat as "no capacity", not as an error).
pub fn choose_offer(offers: &[InstanceOffer], req: &Requirements) -> Option<InstanceOffer> {
    let mut sorted = offers.to_vec();
    sort_offers(&mut sorted);
    sorted.into_iter().find(|o| offer_matches(o, req))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_state::{BackendType, Gpu, InstanceType};

    fn make_offer(name: &str, cpus: u32, memory_gib: u64, gpus: &[(&str, u64)], price: f64) -> InstanceOffer {
        InstanceOffer {
            backend: BackendType::Aws,
            region: "us-east-1".to_string(),
            instance: InstanceType {
                name: name.to_string(),
                resources: InstanceResources {
                    cpus,
                    memory_mib: memory_gib * 1024,
                    gpus: gpus
                        .iter()
                        .map(|(n, mem_gib)| Gpu {
                            name: n.to_string(),
                            memory_mib: mem_gib * 1024,
                        })
                        .collect(),
                    spot: false,
                    disk_size_mib: 100 * 1024,
                },
            },
            price,
        }
    }

    fn catalog() -> Vec<InstanceOffer> {
        vec![
            make_offer("p4d.24xlarge", 96, 1152, &[("A100", 40); 8], 32.77),
            make_offer("m5.2xlarge", 8, 32, &[], 0.38),
            make_offer("g5.xlarge", 4, 16, &[("A10G", 24)], 1.0),
            make_offer("t3.medium", 2, 4, &[], 0.04),
            make_offer("g5.12xlarge", 48, 192, &[("A10G", 24); 4], 5.67),
        ]
    }

    fn cpu_req(cpus: u32, memory_gib: u64) -> Requirements {
        Requirements {
            cpus,
            memory_mib: memory_gib * 1024,
            ..Default::default()
        }
    }

    #[test]
    fn sorts_by_gpu_memory_then_cpu_then_memory() {
        let mut offers = catalog();
        sort_offers(&mut offers);
        let names: Vec<_> = offers.iter().map(|o| o.instance.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["t3.medium", "m5.2xlarge", "g5.xlarge", "g5.12xlarge", "p4d.24xlarge"]
        );
    }

    #[test]
    fn chooses_smallest_satisfying_offer() {
        let chosen = choose_offer(&catalog(), &cpu_req(4, 8)).unwrap();
        assert_eq!(chosen.instance.name, "m5.2xlarge");
    }

    #[test]
    fn gpu_count_defaults_to_one() {
        let req = Requirements {
            gpu: Some(GpuRequirement::default()),
            ..cpu_req(1, 1)
        };
        let chosen = choose_offer(&catalog(), &req).unwrap();
        assert_eq!(chosen.instance.name, "g5.xlarge");
    }

    #[test]
    fn gpu_name_and_memory_filters() {
        let req = Requirements {
            gpu: Some(GpuRequirement {
                names: vec!["a100".to_string()],
                count: Some(2),
                memory_mib: Some(40 * 1024),
            }),
            ..cpu_req(1, 1)
        };
        let chosen = choose_offer(&catalog(), &req).unwrap();
        assert_eq!(chosen.instance.name, "p4d.24xlarge");

        let too_much_memory = Requirements {
            gpu: Some(GpuRequirement {
                names: vec![],
                count: Some(1),
                memory_mib: Some(80 * 1024),
            }),
            ..cpu_req(1, 1)
        };
        assert!(choose_offer(&catalog(), &too_much_memory).is_none());
    }

    #[test]
    fn gpu_count_must_be_met() {
        let req = Requirements {
            gpu: Some(GpuRequirement {
                names: vec!["A10G".to_string()],
                count: Some(4),
                memory_mib: None,
            }),
            ..cpu_req(1, 1)
        };
        assert_eq!(choose_offer(&catalog(), &req).unwrap().instance.name, "g5.12xlarge");
    }

    #[test]
    fn spot_flag_must_match_when_requested() {
        let mut offers = catalog();
        offers[1].instance.resources.spot = true; // m5.2xlarge spot

        let spot_only = Requirements {
            spot: Some(true),
            ..cpu_req(1, 1)
        };
        assert_eq!(choose_offer(&offers, &spot_only).unwrap().instance.name, "m5.2xlarge");

        let on_demand = Requirements {
            spot: Some(false),
            ..cpu_req(1, 1)
        };
        assert_eq!(choose_offer(&offers, &on_demand).unwrap().instance.name, "t3.medium");
    }

    #[test]
    fn price_cap_and_disk_filter() {
        let capped = Requirements {
            max_price: Some(0.01),
            ..cpu_req(1, 1)
        };
        assert!(choose_offer(&catalog(), &capped).is_none());

        let big_disk = Requirements {
            disk_size_mib: Some(200 * 1024),
            ..cpu_req(1, 1)
        };
        assert!(choose_offer(&catalog(), &big_disk).is_none());
    }

    #[test]
    fn empty_offer_list_yields_none() {
        assert!(choose_offer(&[], &cpu_req(1, 1)).is_none());
        assert!(filter_offers(vec![], &cpu_req(1, 1)).is_empty());
    }

    #[test]
    fn choice_is_deterministic_and_minimal() {
        let req = cpu_req(8, 16);
        let mut reversed = catalog();
        reversed.reverse();

        let a = choose_offer(&catalog(), &req).unwrap();
        let b = choose_offer(&reversed, &req).unwrap();
        assert_eq!(a, b);

        let all = filter_offers(catalog(), &req);
        assert!(all.iter().all(|o| offer_matches(o, &req)));
        assert!(all.iter().all(|o| selection_key(&a) <= selection_key(o)));
    }
}
