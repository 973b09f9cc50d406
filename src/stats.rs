//! 지연 통계
//!
//! RFC 6298 방식의 지수 평활 평균/분산 추정기. RTT와 송수신 지연에 사용.

/// 평균 평활 계수 (ɑ)
pub const ALPHA: f64 = 0.125;

/// 분산 평활 계수 (β)
pub const BETA: f64 = 0.25;

/// 추정기 상태 스냅샷
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EstimatorSnapshot {
    /// 평활값
    pub smoothed: f64,

    /// 평활 분산
    pub variance: f64,

    /// 누적 샘플 수
    pub count: i64,
}

/// 지수 평활 평균/분산 추정기
///
/// 서브테스트 인스턴스 하나가 소유, 연결 간 공유하지 않음.
#[derive(Debug, Clone, Default)]
pub struct Estimator {
    smoothed: f64,
    variance: f64,
    count: i64,
}

impl Estimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 샘플 반영
    ///
    /// NaN/음수 필터링은 호출측 책임.
    pub fn update(&mut self, sample: f64) {
        if self.count == 0 {
            self.smoothed = sample;
            self.variance = sample / 2.0;
        } else {
            // 분산은 갱신 전 평균 기준
            self.variance = (1.0 - BETA) * self.variance + BETA * (self.smoothed - sample).abs();
            self.smoothed = (1.0 - ALPHA) * self.smoothed + ALPHA * sample;
        }
        self.count += 1;
    }

    /// 현재 상태
    pub fn snapshot(&self) -> EstimatorSnapshot {
        EstimatorSnapshot {
            smoothed: self.smoothed,
            variance: self.variance,
            count: self.count,
        }
    }

    pub fn smoothed(&self) -> f64 {
        self.smoothed
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }

    pub fn count(&self) -> i64 {
        self.count
    }
}
