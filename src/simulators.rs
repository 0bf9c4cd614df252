//! Environment changes applied once per round after all actions are resolved.
//!
//! Every simulator draws from the world's own random source and reports what it changed as
//! one replay block.

use std::fmt::Write as _;

use rand::seq::IndexedRandom;
use rand::Rng;
use tracing::{debug, instrument};

use crate::common::{Direction, Location};
use crate::world::layer::WorldObject;
use crate::world::AegisWorld;

/// Runs every simulator, clears the world's top-layer removal log and returns the
/// `Sim_Events; ... End_Sim;` block.
#[instrument(skip(world))]
pub fn run_simulators(world: &mut AegisWorld, fire_spread: bool) -> String {
    let mut out = String::from("Sim_Events;\n");
    if fire_spread {
        out.push_str(&spread_fire(world));
    }
    out.push_str(&decay_survivors(world));

    out.push_str("Top_Layer_Rem; { ");
    if world.top_layer_removed.is_empty() {
        out.push_str("NONE");
    }
    for location in world.top_layer_removed.drain(..) {
        let _ = write!(out, "{},", location.proc_string());
    }
    out.push_str(" };\n");

    out.push_str("Agents_Information; { ");
    if world.agents().is_empty() {
        out.push_str("NONE");
    }
    for agent in world.agents() {
        let _ = write!(
            out,
            "({},{},{},{},{}),",
            agent.id().id,
            agent.id().gid,
            agent.energy(),
            agent.location().x,
            agent.location().y
        );
    }
    out.push_str(" };\n");
    out.push_str("End_Sim;\n");
    out
}

/// Up to two burning cells each try to ignite one to three random neighbours.
///
/// Returns an empty string when nothing burns or nothing is left to burn.
pub fn spread_fire(world: &mut AegisWorld) -> String {
    let mut burning: Vec<Location> = world
        .cells()
        .iter()
        .filter(|c| c.is_on_fire())
        .map(|c| c.location())
        .collect();
    if burning.is_empty() || burning.len() == world.cells().len() {
        return String::new();
    }

    let mut out = String::from("Fire Grids; { ");
    let mut ignited = 0;
    let events = world.rng.random_range(0..=2);
    for _ in 0..events {
        let Some(&origin) = burning.choose(&mut world.rng) else {
            break;
        };
        let attempts = world.rng.random_range(1..=3);
        for _ in 0..attempts {
            let target = origin.add(Direction::random(&mut world.rng));
            let Some(cell) = world.cell_mut(target) else {
                continue;
            };
            if cell.is_on_fire() {
                continue;
            }
            cell.ignite();
            burning.push(target);
            ignited += 1;
            out.push_str(&target.proc_string());
        }
    }
    if ignited == 0 {
        out.push_str("NONE");
    }
    out.push_str(" };\n");
    debug!(ignited, "fire spread");
    out
}

/// Living survivors and groups lose some energy with a 40% chance each.
///
/// Returns the `SV; { ... };` and `SVG; { ... };` lines.
pub fn decay_survivors(world: &mut AegisWorld) -> String {
    let mut survivors = String::from("SV; { ");
    let mut groups = String::from("SVG; { ");
    let (mut changed_survivors, mut changed_groups) = (0, 0);

    let AegisWorld { objects, rng, .. } = world;
    for object in objects.values_mut() {
        if matches!(object, WorldObject::Rubble(_)) {
            continue;
        }
        if rng.random_range(0..20) < 12 {
            continue;
        }
        match object {
            WorldObject::Survivor(s) if s.energy > 0 => {
                let damage =
                    s.damage_factor * rng.random_range(1..=5) + s.body_mass + s.mental_state;
                s.energy = s.energy.saturating_sub(cap_damage(damage, rng));
                changed_survivors += 1;
                let _ = write!(survivors, "({},{})", s.id, s.energy);
            }
            WorldObject::SurvivorGroup(g) if g.energy > 0 => {
                let damage = g.number_of_survivors * rng.random_range(1..=10);
                g.energy = g.energy.saturating_sub(cap_damage(damage, rng));
                changed_groups += 1;
                let _ = write!(groups, "({},{})", g.id, g.energy);
            }
            _ => {}
        }
    }

    for (line, changed) in [(&mut survivors, changed_survivors), (&mut groups, changed_groups)] {
        if changed == 0 {
            line.push_str("NONE");
        }
        line.push_str(" };\n");
    }
    debug!(changed_survivors, changed_groups, "survivors decayed");
    survivors + &groups
}

fn cap_damage<R: Rng>(damage: u32, rng: &mut R) -> u32 {
    let cap = rng.random_range(5..=10);
    if damage > cap {
        damage % cap + 1
    } else {
        damage
    }
}

#[cfg(test)]
mod simulators_tests {
    use super::*;
    use crate::common::AgentId;
    use crate::world::description::{StackContent, WorldDescription};

    fn survivor(energy: u32) -> StackContent {
        StackContent::new(
            "sv",
            &[
                ("energy_level", energy),
                ("damage_factor", 2),
                ("body_mass", 1),
                ("mental_state", 1),
            ],
        )
    }

    fn world(seed: u64) -> AegisWorld {
        let description = WorldDescription::empty(4, 4, seed, 50)
            .with_fire(Location::new(0, 0))
            .with_stack(
                Location::new(2, 2),
                1,
                vec![
                    survivor(500),
                    survivor(0),
                    StackContent::new(
                        "svg",
                        &[("energy_level", 500), ("number_of_survivors", 4)],
                    ),
                ],
            );
        AegisWorld::build(&description, true).unwrap()
    }

    fn burning(w: &AegisWorld) -> Vec<Location> {
        w.cells()
            .iter()
            .filter(|c| c.is_on_fire())
            .map(|c| c.location())
            .collect()
    }

    #[test]
    fn fire_only_spreads_to_neighbours() {
        for seed in 0..20 {
            let mut w = world(seed);
            let mut last = 1;
            for _ in 0..10 {
                spread_fire(&mut w);
                let now = burning(&w);
                assert!(now.len() >= last);
                last = now.len();
                for location in &now {
                    let touches_fire = now.iter().any(|other| {
                        other != location
                            && (other.x - location.x).abs() <= 1
                            && (other.y - location.y).abs() <= 1
                    });
                    assert!(*location == Location::new(0, 0) || touches_fire);
                }
            }
        }
    }

    #[test]
    fn fire_report_lists_ignited_cells() {
        let mut w = world(3);
        let text = spread_fire(&mut w);
        let ignited = burning(&w).len() - 1;
        if ignited == 0 {
            assert_eq!(text, "Fire Grids; { NONE };\n");
        } else {
            assert_eq!(text.matches("( ").count(), ignited);
            assert!(text.starts_with("Fire Grids; { ( "));
        }
    }

    #[test]
    fn fire_without_fuel_reports_nothing() {
        let mut w = AegisWorld::build(&WorldDescription::empty(3, 3, 1, 10), true).unwrap();
        assert_eq!(spread_fire(&mut w), "");
    }

    #[test]
    fn decay_never_revives_or_goes_negative() {
        let mut w = world(11);
        let before = w.objects.clone();
        for _ in 0..40 {
            decay_survivors(&mut w);
        }
        for (key, object) in &w.objects {
            match (object, &before[key]) {
                (WorldObject::Survivor(now), WorldObject::Survivor(then)) => {
                    assert!(now.energy <= then.energy)
                }
                (WorldObject::SurvivorGroup(now), WorldObject::SurvivorGroup(then)) => {
                    assert!(now.energy <= then.energy)
                }
                _ => {}
            }
        }
        // the dead survivor never shows up in a report
        let text = decay_survivors(&mut w);
        assert!(!text.contains("(1,"));
        assert!(text.starts_with("SV; { "));
        assert!(text.contains("\nSVG; { "));
    }

    #[test]
    fn decay_is_bounded_per_round() {
        let mut w = world(5);
        for _ in 0..40 {
            let before = w.objects.clone();
            decay_survivors(&mut w);
            for (key, object) in &w.objects {
                let drop = before[key].life_signal() as i64 - object.life_signal() as i64;
                // damage is capped at 10 per round
                assert!((0..=10).contains(&drop));
            }
        }
    }

    #[test]
    fn event_block_layout() {
        let mut w = world(2);
        w.add_agent(AgentId::new(1, 1));
        w.remove_top_layer(Location::new(2, 2));
        let text = run_simulators(&mut w, false);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Sim_Events;");
        assert!(lines[1].starts_with("SV; { "));
        assert!(lines[2].starts_with("SVG; { "));
        assert_eq!(lines[3], "Top_Layer_Rem; { ( 2, 2 ), };");
        let agent = w.agents()[0].clone();
        assert_eq!(
            lines[4],
            format!(
                "Agents_Information; {{ (1,1,50,{},{}), }};",
                agent.location().x,
                agent.location().y
            )
        );
        assert_eq!(lines[5], "End_Sim;");
        assert!(w.top_layer_removed.is_empty());

        let text = run_simulators(&mut w, true);
        assert!(text.contains("Top_Layer_Rem; { NONE };\n"));
        assert!(text.lines().nth(1).unwrap().starts_with("Fire Grids; { "));
    }
}
