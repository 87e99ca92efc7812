// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Construction and destruction of type-erased values

use std::alloc::Layout;
use std::marker::PhantomData;
use std::sync::Arc;

/// One named argument of a custom constructor
#[derive(Debug, Clone)]
pub struct ConstructorArgument {
    pub name: String,
    pub type_name: &'static str,
}

/// A named constructor invoked through raw argument pointers
///
/// The thunk moves out of every argument pointer; the caller must forget the
/// argument values afterwards.
#[derive(Clone)]
pub struct CustomConstructor {
    name: String,
    arguments: Vec<ConstructorArgument>,
    invoke: Arc<dyn Fn(*mut u8, &[*mut u8]) + Send + Sync>,
}

impl CustomConstructor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[ConstructorArgument] {
        &self.arguments
    }

    /// Construct a value at `dst` from the argument pointers
    ///
    /// # Safety
    /// `dst` must be valid for writes of the constructed type and each entry
    /// of `args` must point to an initialized value of the declared argument
    /// type. Argument values are moved out.
    pub unsafe fn invoke(&self, dst: *mut u8, args: &[*mut u8]) {
        debug_assert_eq!(args.len(), self.arguments.len());
        (self.invoke)(dst, args);
    }
}

impl std::fmt::Debug for CustomConstructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomConstructor")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .finish()
    }
}

/// Size, alignment and lifecycle thunks of a storable type
///
/// Every primitive here carries a precondition the caller must observe:
/// `default_construct` and `copy_construct` may only be called when the
/// matching `has_*` accessor returns true.
#[derive(Clone)]
pub struct ConstructibleTrait {
    size: usize,
    align: usize,
    drop_fn: Option<unsafe fn(*mut u8)>,
    default_fn: Option<unsafe fn(*mut u8)>,
    copy_fn: Option<unsafe fn(*mut u8, *const u8)>,
    constructors: Vec<CustomConstructor>,
}

impl ConstructibleTrait {
    /// Start a builder for the concrete type `T`
    pub fn typed<T: Send + Sync + 'static>() -> ConstructibleBuilder<T> {
        ConstructibleBuilder {
            inner: Self {
                size: std::mem::size_of::<T>(),
                align: std::mem::align_of::<T>(),
                drop_fn: if std::mem::needs_drop::<T>() {
                    Some(|ptr| unsafe { std::ptr::drop_in_place(ptr as *mut T) })
                } else {
                    None
                },
                default_fn: None,
                copy_fn: None,
                constructors: Vec::new(),
            },
            _marker: PhantomData,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn alignment(&self) -> usize {
        self.align
    }

    /// Layout of `count` contiguous values
    pub fn array_layout(&self, count: usize) -> Layout {
        // Size is already a multiple of the alignment for sized Rust types.
        Layout::from_size_align(self.size * count, self.align.max(1))
            .expect("layout overflow in type-erased storage")
    }

    pub fn has_default(&self) -> bool {
        self.default_fn.is_some()
    }

    pub fn has_copy(&self) -> bool {
        self.copy_fn.is_some()
    }

    pub fn constructors(&self) -> &[CustomConstructor] {
        &self.constructors
    }

    /// Drop the value at `ptr` in place
    ///
    /// # Safety
    /// `ptr` must point to an initialized value of the described type.
    pub unsafe fn destruct(&self, ptr: *mut u8) {
        if let Some(drop_fn) = self.drop_fn {
            drop_fn(ptr);
        }
    }

    /// Default-construct a value at `dst`
    ///
    /// # Safety
    /// `dst` must be valid for writes of the described type. Requires
    /// `has_default()`.
    pub unsafe fn default_construct(&self, dst: *mut u8) {
        let default_fn = self
            .default_fn
            .expect("default construction requested on a type without default support");
        default_fn(dst);
    }

    /// Copy-construct the value at `src` into `dst`
    ///
    /// # Safety
    /// `dst` must be valid for writes, `src` must point to an initialized
    /// value, and the two must not overlap. Requires `has_copy()`.
    pub unsafe fn copy_construct(&self, dst: *mut u8, src: *const u8) {
        let copy_fn = self
            .copy_fn
            .expect("copy construction requested on a type without copy support");
        copy_fn(dst, src);
    }

    /// Move the value at `src` into `dst` byte-wise
    ///
    /// # Safety
    /// Same as [`copy_construct`](Self::copy_construct), and the caller must
    /// treat `src` as moved-out afterwards.
    pub unsafe fn move_construct(&self, dst: *mut u8, src: *mut u8) {
        std::ptr::copy_nonoverlapping(src, dst, self.size);
    }
}

impl std::fmt::Debug for ConstructibleTrait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstructibleTrait")
            .field("size", &self.size)
            .field("align", &self.align)
            .field("default", &self.has_default())
            .field("copy", &self.has_copy())
            .finish()
    }
}

/// Builder returned by [`ConstructibleTrait::typed`]
pub struct ConstructibleBuilder<T> {
    inner: ConstructibleTrait,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> ConstructibleBuilder<T> {
    /// Advertise default construction
    pub fn with_default(mut self) -> Self
    where
        T: Default,
    {
        self.inner.default_fn = Some(|dst| unsafe {
            std::ptr::write(dst as *mut T, T::default());
        });
        self
    }

    /// Advertise copy construction through `Clone`
    pub fn with_copy(mut self) -> Self
    where
        T: Clone,
    {
        self.inner.copy_fn = Some(|dst, src| unsafe {
            std::ptr::write(dst as *mut T, (*(src as *const T)).clone());
        });
        self
    }

    /// Attach a named custom constructor
    pub fn with_constructor(
        mut self,
        name: impl Into<String>,
        arguments: Vec<ConstructorArgument>,
        invoke: Arc<dyn Fn(*mut u8, &[*mut u8]) + Send + Sync>,
    ) -> Self {
        self.inner.constructors.push(CustomConstructor {
            name: name.into(),
            arguments,
            invoke,
        });
        self
    }

    pub fn build(self) -> ConstructibleTrait {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;

    #[test]
    fn default_and_copy() {
        let con = ConstructibleTrait::typed::<String>()
            .with_default()
            .with_copy()
            .build();
        assert_eq!(con.size(), std::mem::size_of::<String>());

        let mut a = MaybeUninit::<String>::uninit();
        unsafe { con.default_construct(a.as_mut_ptr() as *mut u8) };
        let mut a = unsafe { a.assume_init() };
        a.push_str("hi");

        let mut b = MaybeUninit::<String>::uninit();
        unsafe { con.copy_construct(b.as_mut_ptr() as *mut u8, &a as *const String as *const u8) };
        let b = unsafe { b.assume_init() };
        assert_eq!(b, "hi");
    }

    #[test]
    fn custom_constructor() {
        let con = ConstructibleTrait::typed::<(i32, i32)>()
            .with_constructor(
                "pair",
                vec![
                    ConstructorArgument {
                        name: "a".into(),
                        type_name: "i32",
                    },
                    ConstructorArgument {
                        name: "b".into(),
                        type_name: "i32",
                    },
                ],
                Arc::new(|dst, args| unsafe {
                    let a = std::ptr::read(args[0] as *mut i32);
                    let b = std::ptr::read(args[1] as *mut i32);
                    std::ptr::write(dst as *mut (i32, i32), (a, b));
                }),
            )
            .build();

        let ctor = &con.constructors()[0];
        assert_eq!(ctor.name(), "pair");
        assert_eq!(ctor.arguments().len(), 2);

        let mut a = 1i32;
        let mut b = 2i32;
        let mut out = MaybeUninit::<(i32, i32)>::uninit();
        unsafe {
            ctor.invoke(
                out.as_mut_ptr() as *mut u8,
                &[&mut a as *mut i32 as *mut u8, &mut b as *mut i32 as *mut u8],
            );
        }
        assert_eq!(unsafe { out.assume_init() }, (1, 2));
    }

    #[test]
    #[should_panic(expected = "without default support")]
    fn missing_default_panics() {
        let con = ConstructibleTrait::typed::<String>().build();
        let mut slot = MaybeUninit::<String>::uninit();
        unsafe { con.default_construct(slot.as_mut_ptr() as *mut u8) };
    }
}
