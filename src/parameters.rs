use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

/// パラメーター記述子 - 各パラメーターの特性を定義
pub trait ParameterDescriptor: Send + Sync + fmt::Debug {
    /// パラメーター名
    fn name(&self) -> &'static str;

    /// 最小値
    fn min_value(&self) -> f32;

    /// 最大値
    fn max_value(&self) -> f32;

    /// デフォルト値
    fn default_value(&self) -> f32;

    /// 単位（Hz, s など）
    fn unit(&self) -> &'static str { "" }

    /// 値の検証 - 範囲外はクランプ、NaN/無限大のみ拒否
    fn validate(&self, value: f32) -> Result<f32, ParameterError> {
        if !value.is_finite() {
            return Err(ParameterError::NotFinite {
                name: self.name().to_string(),
                value,
            });
        }
        Ok(value.clamp(self.min_value(), self.max_value()))
    }

    /// 表示用の値フォーマット
    fn format_value(&self, value: f32) -> String {
        if self.unit().is_empty() {
            format!("{:.2}", value)
        } else {
            format!("{:.2} {}", value, self.unit())
        }
    }
}

/// パラメーターエラー型
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("Parameter '{name}' not found")]
    NotFound { name: String },

    #[error("Parameter '{name}' cannot be set to {value}")]
    NotFinite { name: String, value: f32 },
}

/// パラメーター管理トレイト - ノードのパラメーター操作を統一
///
/// 値はコントロールスレッドから `&self` で書き込まれ、オーディオスレッドは
/// 次のブロック先頭で読み取る。
pub trait Parameterizable: Send + Sync {
    /// パラメーターを設定し、クランプ後に適用された値を返す
    fn set_parameter(&self, name: &str, value: f32) -> Result<f32, ParameterError>;

    /// パラメーターを取得
    fn get_parameter(&self, name: &str) -> Result<f32, ParameterError>;

    /// 全パラメーターを取得
    fn get_all_parameters(&self) -> HashMap<String, f32>;

    /// パラメーター記述子一覧を取得
    fn get_parameter_descriptors(&self) -> Vec<Box<dyn ParameterDescriptor>>;

    /// パラメーターが存在するかチェック
    fn has_parameter(&self, name: &str) -> bool {
        self.get_parameter(name).is_ok()
    }
}

/// 基本的なパラメーター記述子の実装
#[derive(Debug, Clone)]
pub struct BasicParameter {
    pub name: &'static str,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub unit: &'static str,
}

impl BasicParameter {
    pub fn new(name: &'static str, min: f32, max: f32, default: f32) -> Self {
        Self {
            name,
            min,
            max,
            default,
            unit: "",
        }
    }

    pub fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }
}

impl ParameterDescriptor for BasicParameter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn min_value(&self) -> f32 {
        self.min
    }

    fn max_value(&self) -> f32 {
        self.max
    }

    fn default_value(&self) -> f32 {
        self.default
    }

    fn unit(&self) -> &'static str {
        self.unit
    }
}

/// ロックフリーのf32パラメーター（コントロール → オーディオ）
///
/// f32をビット列として `AtomicU32` に格納する。
#[derive(Debug)]
pub struct AtomicParam {
    bits: AtomicU32,
}

impl AtomicParam {
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for AtomicParam {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// 線形パラメーターランプ - クリックノイズ防止
///
/// 新しいターゲットが設定されると、現在値から `ramp_seconds` かけて
/// 線形に移動し、最後のサンプルで正確にターゲットへ到達する。
/// オーディオスレッド専用。
#[derive(Debug, Clone)]
pub struct ParameterRamp {
    current: f32,
    target: f32,
    increment: f32,
    samples_remaining: u32,
    ramp_seconds: f32,
    sample_rate: f32,
}

impl ParameterRamp {
    /// 初期値で静止した状態のランプを作成
    pub fn new(initial: f32, ramp_seconds: f32, sample_rate: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            increment: 0.0,
            samples_remaining: 0,
            ramp_seconds: ramp_seconds.max(0.0),
            sample_rate,
        }
    }

    /// ターゲット値を設定
    ///
    /// 同じターゲットの再設定は何もしない。ランプ途中での変更は
    /// 現在値から新しいランプを開始する。
    pub fn set_target(&mut self, target: f32) {
        if target == self.target {
            return;
        }
        self.target = target;

        let samples = (self.sample_rate * self.ramp_seconds).round();
        if samples < 1.0 {
            self.snap_to_target();
            return;
        }

        self.samples_remaining = samples as u32;
        self.increment = (target - self.current) / samples;
    }

    /// 1サンプル進めて値を返す
    #[inline]
    pub fn next_value(&mut self) -> f32 {
        if self.samples_remaining > 0 {
            self.samples_remaining -= 1;
            if self.samples_remaining == 0 {
                self.current = self.target;
            } else {
                self.current += self.increment;
            }
        } else {
            self.current = self.target;
        }
        self.current
    }

    /// 即座にターゲットへ移動
    pub fn snap_to_target(&mut self) {
        self.current = self.target;
        self.increment = 0.0;
        self.samples_remaining = 0;
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_ramping(&self) -> bool {
        self.samples_remaining > 0
    }

}

/// パラメーター管理のヘルパーマクロ
///
/// 各フィールドは `AtomicParam` であること。
#[macro_export]
macro_rules! define_parameters {
    (
        $(
            $name:ident: $param_type:expr
        ),* $(,)?
    ) => {
        fn get_parameter_descriptors(&self) -> Vec<Box<dyn $crate::parameters::ParameterDescriptor>> {
            vec![
                $(
                    Box::new($param_type),
                )*
            ]
        }

        fn set_parameter(&self, name: &str, value: f32) -> Result<f32, $crate::parameters::ParameterError> {
            match name {
                $(
                    stringify!($name) => {
                        let validated = $crate::parameters::ParameterDescriptor::validate(&$param_type, value)?;
                        self.$name.store(validated);
                        Ok(validated)
                    }
                )*
                _ => Err($crate::parameters::ParameterError::NotFound {
                    name: name.to_string(),
                }),
            }
        }

        fn get_parameter(&self, name: &str) -> Result<f32, $crate::parameters::ParameterError> {
            match name {
                $(
                    stringify!($name) => Ok(self.$name.load()),
                )*
                _ => Err($crate::parameters::ParameterError::NotFound {
                    name: name.to_string(),
                }),
            }
        }

        fn get_all_parameters(&self) -> std::collections::HashMap<String, f32> {
            let mut params = std::collections::HashMap::new();
            $(
                params.insert(stringify!($name).to_string(), self.$name.load());
            )*
            params
        }
    };
}
