mod concurrency;
mod delta_codec;
