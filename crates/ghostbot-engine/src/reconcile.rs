use std::collections::HashMap;
use std::time::Duration;

use ghostbot_contracts::color::ColorId;
use ghostbot_contracts::grid::PixelSample;

use crate::api::{EnergyBudget, Placement};
use crate::canvas::CanvasCache;

/// Target pixels whose cached color is missing or differs.
pub fn outstanding(target: &[PixelSample], cache: &CanvasCache) -> Vec<PixelSample> {
    target
        .iter()
        .filter(|pixel| {
            cache
                .get(&pixel.coord)
                .map(|current| current.id() != pixel.color.id())
                .unwrap_or(true)
        })
        .copied()
        .collect()
}

/// Stable sort by how often each color occurs in `pixels`, rarest first.
pub fn order_by_rarity(pixels: &mut [PixelSample]) {
    let mut counts: HashMap<ColorId, usize> = HashMap::new();
    for pixel in pixels.iter() {
        *counts.entry(pixel.color.id()).or_default() += 1;
    }
    pixels.sort_by_key(|pixel| counts.get(&pixel.color.id()).copied().unwrap_or(0));
}

pub fn take_batch(ordered: &[PixelSample], budget: &EnergyBudget) -> Vec<Placement> {
    ordered
        .iter()
        .take(budget.current as usize)
        .map(|pixel| Placement {
            coord: pixel.coord,
            color: pixel.color.id(),
        })
        .collect()
}

/// Time to wait before the next pass: enough energy for everything still
/// outstanding, or for a full budget less `reserve`, whichever is smaller.
pub fn pacing_delay(outstanding: usize, budget: &EnergyBudget, reserve: u32) -> Duration {
    let max = budget.max as usize;
    let pixels = if max > outstanding {
        outstanding
    } else {
        max.saturating_sub(reserve as usize)
    };
    let seconds = pixels as f64 * budget.seconds_per_pixel;
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use ghostbot_contracts::color::Color;
    use ghostbot_contracts::grid::GridCoordinate;

    use super::*;
    use crate::canvas::{CanvasDelta, CanvasState};

    const RED: Color = Color::rgb(255, 0, 0);
    const BLUE: Color = Color::rgb(0, 0, 255);
    const GREEN: Color = Color::rgb(0, 255, 0);

    fn px(x: i64, y: i64, color: Color) -> PixelSample {
        PixelSample::new(GridCoordinate::new(x, y), color)
    }

    fn budget(current: u32, max: u32, seconds_per_pixel: f64) -> EnergyBudget {
        EnergyBudget {
            current,
            max,
            seconds_per_pixel,
        }
    }

    #[test]
    fn outstanding_keeps_missing_and_mismatched_pixels() {
        let target = vec![px(0, 0, RED), px(1, 0, BLUE), px(2, 0, GREEN)];
        let mut state = CanvasState::default();
        state.apply(CanvasDelta {
            samples: vec![px(0, 0, RED), px(1, 0, GREEN)],
            ..CanvasDelta::default()
        });
        let diff = outstanding(&target, state.cache());
        assert_eq!(diff, vec![px(1, 0, BLUE), px(2, 0, GREEN)]);

        state.apply(CanvasDelta {
            samples: diff.clone(),
            ..CanvasDelta::default()
        });
        assert!(outstanding(&target, state.cache()).is_empty());
    }

    #[test]
    fn partial_alpha_matches_opaque_cache_entry() {
        let target = vec![px(0, 0, Color::rgba(255, 0, 0, 200))];
        let mut state = CanvasState::default();
        state.apply(CanvasDelta {
            samples: vec![px(0, 0, RED)],
            ..CanvasDelta::default()
        });
        assert!(outstanding(&target, state.cache()).is_empty());
    }

    #[test]
    fn rarer_colors_come_first_and_ties_keep_order() {
        let mut pixels = vec![
            px(0, 0, RED),
            px(1, 0, BLUE),
            px(2, 0, RED),
            px(3, 0, GREEN),
            px(4, 0, RED),
            px(5, 0, BLUE),
        ];
        order_by_rarity(&mut pixels);
        let colors: Vec<_> = pixels.iter().map(|p| p.color).collect();
        assert_eq!(colors, vec![GREEN, BLUE, BLUE, RED, RED, RED]);
        assert_eq!(pixels[1].coord, GridCoordinate::new(1, 0));
        assert_eq!(pixels[2].coord, GridCoordinate::new(5, 0));
    }

    #[test]
    fn batch_is_capped_by_current_energy() {
        let pixels = vec![px(0, 0, RED), px(1, 0, BLUE), px(2, 0, GREEN)];
        let batch = take_batch(&pixels, &budget(2, 10, 1.0));
        assert_eq!(
            batch,
            vec![
                Placement {
                    coord: GridCoordinate::new(0, 0),
                    color: 0xff0000,
                },
                Placement {
                    coord: GridCoordinate::new(1, 0),
                    color: 0x0000ff,
                },
            ]
        );
        assert!(take_batch(&pixels, &budget(0, 10, 1.0)).is_empty());
    }

    #[test]
    fn pacing_waits_for_outstanding_or_budget_less_reserve() {
        assert_eq!(
            pacing_delay(5, &budget(0, 10, 2.0), 2),
            Duration::from_secs(10)
        );
        assert_eq!(
            pacing_delay(50, &budget(0, 10, 2.0), 2),
            Duration::from_secs(16)
        );
        assert_eq!(pacing_delay(50, &budget(0, 1, 2.0), 2), Duration::ZERO);
        assert_eq!(pacing_delay(5, &budget(0, 10, 0.0), 2), Duration::ZERO);
    }

    #[test]
    fn pacing_saturates_instead_of_overflowing() {
        assert_eq!(pacing_delay(5, &budget(0, 10, 1e19), 2), Duration::MAX);
        assert_eq!(pacing_delay(5, &budget(0, 10, f64::INFINITY), 2), Duration::MAX);
        assert_eq!(pacing_delay(5, &budget(0, 10, f64::NAN), 2), Duration::ZERO);
    }
}
