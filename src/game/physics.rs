//! Swept ball movement and collision response

use std::f32::consts::{FRAC_PI_2, PI};

use glam::Vec2;
use tracing::{trace, warn};

use crate::ws::protocol::Side;

use super::entities::{Arena, Ball, Paddle, SimulationParams};
use super::geometry::{Aabb, RayHit};

/// What a ray struck
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    Wall,
    /// Goal zone owned by (threatening) the given side
    GoalZone(Side),
    /// Early-warning volume in front of a paddle, level 0 outermost
    PaddleTrigger { side: Side, level: u8 },
    PaddleSolid(Side),
}

/// Things that happened while resolving a slice
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CollisionEvent {
    WallBounce,
    PaddleHit(Side),
    TriggerCrossed { side: Side, level: u8 },
    Goal { scorer: Side },
    /// No radial sample found the paddle; the ball was halted
    Degenerate { side: Side },
}

/// Collision system for moving the ball through a time slice
pub struct CollisionSystem;

impl CollisionSystem {
    /// Advance the ball and both paddles through `dt` seconds
    pub fn step(arena: &mut Arena, dt: f32, events: &mut Vec<CollisionEvent>) {
        if dt <= 0.0 {
            return;
        }

        if !arena.ball.moving {
            Self::advance_paddles(&mut arena.paddles, dt);
            return;
        }

        if let Some(zone) = arena
            .goal_zones
            .iter()
            .find(|zone| zone.bounds.contains(arena.ball.position))
        {
            events.push(CollisionEvent::Goal {
                scorer: zone.owner.opponent(),
            });
            arena.ball.halt();
            Self::advance_paddles(&mut arena.paddles, dt);
            return;
        }

        let params = &arena.params;
        let epsilon = params.time_epsilon;
        let margin = params.cast_margin;
        let max_iterations = params.max_iterations;

        let mut remaining = dt;
        let mut excluded: Vec<SurfaceKind> = Vec::new();
        let mut iterations = 0;

        while remaining > epsilon && arena.ball.moving && iterations < max_iterations {
            iterations += 1;

            let ball = &arena.ball;
            let travel = ball.speed * remaining;
            let reach = travel + ball.radius + margin;
            let colliders = Self::colliders(arena);

            let Some((kind, hit)) =
                Self::cast(&colliders, ball.position, ball.direction, reach, &excluded)
            else {
                arena.ball.position += arena.ball.direction * travel;
                Self::advance_paddles(&mut arena.paddles, remaining);
                remaining = 0.0;
                break;
            };

            let contact = (hit.distance - ball.radius).max(0.0);
            let fraction = if travel > 0.0 {
                (contact / travel).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let contact_time = remaining * fraction;

            let consumed = match kind {
                SurfaceKind::PaddleTrigger { side, level } => {
                    trace!(?side, level, "Ball crossed paddle trigger");
                    excluded.push(kind);
                    events.push(CollisionEvent::TriggerCrossed { side, level });
                    0.0
                }
                SurfaceKind::Wall => {
                    let ball = &mut arena.ball;
                    ball.position += ball.direction * contact;
                    ball.bounce(hit.normal);
                    events.push(CollisionEvent::WallBounce);
                    contact_time
                }
                SurfaceKind::GoalZone(owner) => {
                    let ball = &mut arena.ball;
                    ball.position += ball.direction * contact;
                    ball.halt();
                    events.push(CollisionEvent::Goal {
                        scorer: owner.opponent(),
                    });
                    contact_time
                }
                SurfaceKind::PaddleSolid(side) => {
                    // Paddle as it stands at contact time; the real one is untouched.
                    let probe = arena.paddles[side.index()].advanced(contact_time);
                    let ball = &mut arena.ball;
                    ball.position += ball.direction * contact;

                    match Self::radial_normal(ball, &probe, &arena.params) {
                        Some(normal) => {
                            ball.bounce(normal);
                            ball.accelerate();
                            events.push(CollisionEvent::PaddleHit(side));
                        }
                        None => {
                            warn!(
                                ?side,
                                x = ball.position.x,
                                y = ball.position.y,
                                "No radial impact sample on paddle, halting ball"
                            );
                            ball.halt();
                            events.push(CollisionEvent::Degenerate { side });
                        }
                    }
                    contact_time
                }
            };

            Self::advance_paddles(&mut arena.paddles, consumed);
            remaining -= consumed;
        }

        if remaining > 0.0 {
            Self::advance_paddles(&mut arena.paddles, remaining);
        }
    }

    fn advance_paddles(paddles: &mut [Paddle; 2], dt: f32) {
        if dt > 0.0 {
            for paddle in paddles.iter_mut() {
                paddle.advance(dt);
            }
        }
    }

    /// Every surface the ball can strike
    fn colliders(arena: &Arena) -> Vec<(SurfaceKind, Aabb)> {
        let mut colliders = Vec::with_capacity(12);
        colliders.extend(arena.walls.iter().map(|w| (SurfaceKind::Wall, w.bounds)));
        colliders.extend(
            arena
                .goal_zones
                .iter()
                .map(|z| (SurfaceKind::GoalZone(z.owner), z.bounds)),
        );
        for paddle in &arena.paddles {
            colliders.push((SurfaceKind::PaddleSolid(paddle.side), paddle.body()));
            colliders.extend(paddle.triggers().map(|(level, bounds)| {
                (
                    SurfaceKind::PaddleTrigger {
                        side: paddle.side,
                        level,
                    },
                    bounds,
                )
            }));
        }
        colliders
    }

    /// Closest non-excluded surface along the ray
    fn cast(
        colliders: &[(SurfaceKind, Aabb)],
        origin: Vec2,
        dir: Vec2,
        max_distance: f32,
        excluded: &[SurfaceKind],
    ) -> Option<(SurfaceKind, RayHit)> {
        colliders
            .iter()
            .filter(|(kind, _)| !excluded.contains(kind))
            .filter_map(|(kind, bounds)| {
                bounds
                    .ray_entry(origin, dir, max_distance)
                    .map(|hit| (*kind, hit))
            })
            .min_by(|a, b| a.1.distance.total_cmp(&b.1.distance))
    }

    /// Contact normal from a fan of rays across the ball's leading hemisphere.
    /// The nearest hit on the paddle wins.
    fn radial_normal(ball: &Ball, paddle: &Paddle, params: &SimulationParams) -> Option<Vec2> {
        let body = paddle.body();
        let rays = params.fan_rays.max(1);
        let reach = ball.radius + params.cast_margin + params.fan_reach;
        let heading = ball.direction.y.atan2(ball.direction.x);

        (0..rays)
            .filter_map(|i| {
                let t = if rays == 1 {
                    0.5
                } else {
                    i as f32 / (rays - 1) as f32
                };
                let dir = Vec2::from_angle(heading - FRAC_PI_2 + t * PI);
                body.ray_entry(ball.position, dir, reach)
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
            .map(|hit| hit.normal)
    }
}
