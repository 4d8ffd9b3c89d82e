//! Ball, paddles, walls and goal zones

use glam::Vec2;

use crate::ws::protocol::Side;

use super::geometry::Aabb;

/// Geometric and tuning constants for one arena.
///
/// The arena is centred on the origin: `x` runs between the two goals, `y`
/// between the two walls. All distances are in arena units, speeds in units
/// per second.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParams {
    /// Distance between the two goal lines
    pub arena_width: f32,
    /// Distance between the two walls
    pub arena_height: f32,
    pub wall_thickness: f32,
    /// Depth of each goal zone behind its goal line
    pub goal_depth: f32,

    /// Distance from a goal line to the paddle's center
    pub paddle_inset: f32,
    /// Full width/height of the paddle solid
    pub paddle_size: Vec2,
    pub paddle_speed: f32,
    /// Distances of the early-warning triggers in front of the paddle face
    pub trigger_offsets: Vec<f32>,
    pub trigger_thickness: f32,

    pub ball_radius: f32,
    pub ball_min_speed: f32,
    pub ball_max_speed: f32,
    /// Speed multiplier applied on every paddle hit
    pub ball_acceleration: f32,
    pub serve_delay_ms: u64,
    /// Largest serve angle off the x axis, radians
    pub serve_max_angle: f32,

    /// Extra reach added to the primary ray cast
    pub cast_margin: f32,
    /// Number of rays in the radial impact fan
    pub fan_rays: usize,
    /// Reach of fan rays beyond the ball radius
    pub fan_reach: f32,
    /// Remaining slice time below which a slice counts as consumed, seconds
    pub time_epsilon: f32,
    /// Resolution passes allowed per slice
    pub max_iterations: usize,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            arena_width: 20.0,
            arena_height: 12.0,
            wall_thickness: 1.0,
            goal_depth: 2.0,
            paddle_inset: 1.0,
            paddle_size: Vec2::new(0.4, 2.4),
            paddle_speed: 9.0,
            trigger_offsets: vec![1.5, 0.8, 0.3],
            trigger_thickness: 0.1,
            ball_radius: 0.25,
            ball_min_speed: 8.0,
            ball_max_speed: 22.0,
            ball_acceleration: 1.08,
            serve_delay_ms: 1000,
            serve_max_angle: std::f32::consts::FRAC_PI_4,
            cast_margin: 0.05,
            fan_rays: 9,
            fan_reach: 0.2,
            time_epsilon: 1e-5,
            max_iterations: 50,
        }
    }
}

/// The ball
#[derive(Debug, Clone, PartialEq)]
pub struct Ball {
    pub position: Vec2,
    /// Always unit length
    pub direction: Vec2,
    pub speed: f32,
    pub min_speed: f32,
    pub max_speed: f32,
    pub acceleration: f32,
    pub radius: f32,
    pub moving: bool,
    /// Simulated time at which a served ball starts moving
    pub resume_at: Option<u64>,
}

impl Ball {
    pub fn new(params: &SimulationParams) -> Self {
        Self {
            position: Vec2::ZERO,
            direction: Vec2::X,
            speed: params.ball_min_speed,
            min_speed: params.ball_min_speed,
            max_speed: params.ball_max_speed,
            acceleration: params.ball_acceleration,
            radius: params.ball_radius,
            moving: false,
            resume_at: None,
        }
    }

    /// Respawn at the center, heading along `direction`, idle until `resume_at`.
    pub fn generate(&mut self, direction: Vec2, resume_at: u64) {
        self.position = Vec2::ZERO;
        self.direction = direction.try_normalize().unwrap_or(Vec2::X);
        self.speed = self.min_speed;
        self.moving = false;
        self.resume_at = Some(resume_at);
    }

    /// Start moving if the serve delay has elapsed at `now`
    pub fn resume_if_due(&mut self, now: u64) -> bool {
        match self.resume_at {
            Some(at) if !self.moving && at <= now => {
                self.moving = true;
                self.resume_at = None;
                true
            }
            _ => false,
        }
    }

    /// Stop dead; only `generate` brings the ball back
    pub fn halt(&mut self) {
        self.moving = false;
        self.resume_at = None;
    }

    pub fn bounce(&mut self, normal: Vec2) {
        let reflected = super::geometry::reflect(self.direction, normal);
        self.direction = reflected.try_normalize().unwrap_or(-self.direction);
    }

    pub fn accelerate(&mut self) {
        self.speed = (self.speed * self.acceleration).min(self.max_speed);
    }
}

/// Unit direction for a serve toward `side` at `angle` radians off the x axis
pub fn serve_direction(toward: Side, angle: f32) -> Vec2 {
    let x = match toward {
        Side::P1 => -1.0,
        Side::P2 => 1.0,
    };
    Vec2::new(x * angle.cos(), angle.sin())
}

/// A paddle that travels along `y` only
#[derive(Debug, Clone, PartialEq)]
pub struct Paddle {
    pub side: Side,
    pub position: Vec2,
    /// -1, 0 or 1 along `y`
    pub direction: i8,
    pub speed: f32,
    pub size: Vec2,
    travel_limit: f32,
    /// Outward to inward
    trigger_offsets: Vec<f32>,
    trigger_thickness: f32,
}

impl Paddle {
    pub fn new(side: Side, params: &SimulationParams) -> Self {
        let half_width = params.arena_width / 2.0;
        let x = match side {
            Side::P1 => -half_width + params.paddle_inset,
            Side::P2 => half_width - params.paddle_inset,
        };

        let mut trigger_offsets: Vec<f32> = params
            .trigger_offsets
            .iter()
            .copied()
            .filter(|offset| *offset > 0.0)
            .collect();
        trigger_offsets.sort_by(|a, b| b.total_cmp(a));

        Self {
            side,
            position: Vec2::new(x, 0.0),
            direction: 0,
            speed: params.paddle_speed,
            size: params.paddle_size,
            travel_limit: ((params.arena_height - params.paddle_size.y) / 2.0).max(0.0),
            trigger_offsets,
            trigger_thickness: params.trigger_thickness,
        }
    }

    pub fn set_direction(&mut self, direction: i8) {
        self.direction = direction.clamp(-1, 1);
    }

    /// Move along the travel axis for `dt` seconds, clamped to the arena
    pub fn advance(&mut self, dt: f32) {
        let y = self.position.y + f32::from(self.direction) * self.speed * dt;
        self.position.y = y.clamp(-self.travel_limit, self.travel_limit);
    }

    /// Copy of this paddle as it will be after `dt` seconds
    pub fn advanced(&self, dt: f32) -> Paddle {
        let mut paddle = self.clone();
        paddle.advance(dt);
        paddle
    }

    /// +1 when the face points toward +x
    pub fn facing(&self) -> f32 {
        match self.side {
            Side::P1 => 1.0,
            Side::P2 => -1.0,
        }
    }

    pub fn body(&self) -> Aabb {
        Aabb::from_center(self.position, self.size / 2.0)
    }

    /// Early-warning volumes as `(level, bounds)`, level 0 outermost
    pub fn triggers(&self) -> impl Iterator<Item = (u8, Aabb)> + '_ {
        let face_x = self.position.x + self.facing() * self.size.x / 2.0;
        let half = Vec2::new(self.trigger_thickness / 2.0, self.size.y / 2.0);
        self.trigger_offsets
            .iter()
            .enumerate()
            .map(move |(level, offset)| {
                let x = face_x + self.facing() * (offset + half.x);
                (level as u8, Aabb::from_center(Vec2::new(x, self.position.y), half))
            })
    }
}

/// Static solid boundary
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wall {
    pub bounds: Aabb,
}

/// Trigger volume behind a paddle; crossing it scores for the owner's opponent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalZone {
    pub owner: Side,
    pub bounds: Aabb,
}

/// Every entity of one match
#[derive(Debug, Clone, PartialEq)]
pub struct Arena {
    pub params: SimulationParams,
    pub ball: Ball,
    pub paddles: [Paddle; 2],
    pub walls: [Wall; 2],
    pub goal_zones: [GoalZone; 2],
}

impl Arena {
    pub fn new(params: SimulationParams) -> Self {
        let half_w = params.arena_width / 2.0;
        let half_h = params.arena_height / 2.0;
        let outer_x = half_w + params.goal_depth;

        let walls = [
            Wall {
                bounds: Aabb::new(
                    Vec2::new(-outer_x, half_h),
                    Vec2::new(outer_x, half_h + params.wall_thickness),
                ),
            },
            Wall {
                bounds: Aabb::new(
                    Vec2::new(-outer_x, -half_h - params.wall_thickness),
                    Vec2::new(outer_x, -half_h),
                ),
            },
        ];

        let goal_zones = [
            GoalZone {
                owner: Side::P1,
                bounds: Aabb::new(Vec2::new(-outer_x, -half_h), Vec2::new(-half_w, half_h)),
            },
            GoalZone {
                owner: Side::P2,
                bounds: Aabb::new(Vec2::new(half_w, -half_h), Vec2::new(outer_x, half_h)),
            },
        ];

        Self {
            ball: Ball::new(&params),
            paddles: [Paddle::new(Side::P1, &params), Paddle::new(Side::P2, &params)],
            walls,
            goal_zones,
            params,
        }
    }

    pub fn paddle(&self, side: Side) -> &Paddle {
        &self.paddles[side.index()]
    }

    pub fn paddle_mut(&mut self, side: Side) -> &mut Paddle {
        &mut self.paddles[side.index()]
    }

    /// Respawn the ball toward `toward`; it starts moving `serve_delay_ms` after `now`.
    /// Returns the time it starts moving and its direction.
    pub fn serve(&mut self, now: u64, toward: Side, angle: f32) -> (u64, Vec2) {
        let max = self.params.serve_max_angle;
        let direction = serve_direction(toward, angle.clamp(-max, max));
        let resume_at = now + self.params.serve_delay_ms;
        self.ball.generate(direction, resume_at);
        (resume_at, self.ball.direction)
    }
}
